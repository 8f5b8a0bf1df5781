//! The blockd core: entry model, the allow/block registries, the rule
//! engine and the background scheduler.

pub mod context;
pub mod engine;
pub mod entry;
pub mod registry;
pub mod rule;
pub mod scheduler;

pub use context::Context;
pub use engine::RuleEngine;
pub use entry::{IpEntry, ListKind, DEFAULT_HOST, EXPIRES_NEVER};
pub use registry::Registries;
pub use rule::{AggType, FilterClause, FilterOp, Offender, RateRule};
