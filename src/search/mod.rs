//! Client for the external log-analytics backend.
//!
//! The backend is consumed over HTTP: a bool-filtered, time-bounded search
//! with a terms aggregation over client addresses, plus an existence check
//! for date-partitioned indices. The [`SearchBackend`] trait is the seam the
//! rule engine evaluates against, so tests can substitute a mock.

mod client;
mod query;

pub use client::{EsClient, SearchBackend};
#[cfg(test)]
pub use client::MockSearchBackend;
pub use query::{build_query, parse_buckets, AGG_NAME, CLIENT_IP_FIELD, TIMESTAMP_FIELD};
