use thiserror::Error;

use crate::core::entry::{IpEntry, ListKind};

/// Errors produced by the blockd core.
#[derive(Error, Debug)]
pub enum BlockdError {
    /// Malformed IP or CIDR text, rejected before any persistence or mutation
    #[error("invalid IP or CIDR: {0}")]
    InvalidAddress(String),

    /// The entry overlaps an existing allow/block entry and force was not set.
    /// Carries the first conflicting entry so callers can branch on it.
    #[error("IP entry {ip} conflicts with {kind} list entry {conflicting}; use force=true to override")]
    Conflict {
        ip: String,
        kind: ListKind,
        conflicting: IpEntry,
    },

    /// Lookup on an absent id; callers usually treat this as a no-op
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad rule configuration: filter grammar, duration or aggregation type
    #[error("invalid rule configuration: {0}")]
    Filter(String),

    /// Store write/read failure; fatal to the single operation
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Search backend timeout or connection failure; transient, retried next pass
    #[error("search backend unavailable: {0}")]
    SearchUnavailable(String),

    /// Notification sink rejection; logged only, never surfaced to add() callers
    #[error("notification delivery failed: {0}")]
    Notification(String),

    /// Configuration loading errors
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Result type for blockd operations
pub type BlockdResult<T> = Result<T, BlockdError>;
