//! Persistent store for list entries, ban rules and the audit log.
//! SQLite-backed; rows are insert-then-delete, never edited in place.

mod store;

pub use store::{AuditRecord, Store, StoredEntry, StoredRule};
