//! blockd maintains a live network access-control policy: allow and block
//! lists of IP/CIDR entries with expiry and reason metadata, reconciled by
//! a background scheduler against traffic metrics from an external
//! log-analytics backend. Enforcement itself happens elsewhere; this
//! process is the single point of truth for the lists.

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod notify;
pub mod search;
pub mod utils;

pub use error::{BlockdError, BlockdResult};
