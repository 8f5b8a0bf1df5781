use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::core::entry::{IpEntry, ListKind};
use crate::error::{BlockdError, BlockdResult};

const CREATE_RULES: &str = r#"
CREATE TABLE "rules" (
    "id"          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT UNIQUE,
    "description" TEXT NOT NULL,
    "aggtype"     TEXT NOT NULL,
    "limit"       INTEGER NOT NULL,
    "duration"    TEXT NOT NULL,
    "filters"     TEXT
);
"#;

const CREATE_LISTS: &str = r#"
CREATE TABLE "lists" (
    "id"        INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT UNIQUE,
    "type"      TEXT NOT NULL,
    "ip"        TEXT NOT NULL,
    "reason"    TEXT NOT NULL,
    "timestamp" INTEGER NOT NULL,
    "expires"   INTEGER NOT NULL,
    "host"      TEXT NOT NULL
);
"#;

const CREATE_AUDIT: &str = r#"
CREATE TABLE "auditlog" (
    "id"        INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT UNIQUE,
    "ip"        TEXT NOT NULL,
    "event"     TEXT NOT NULL,
    "timestamp" INTEGER NOT NULL
);
"#;

/// Raw `lists` row as persisted.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub kind: String,
    pub ip: String,
    pub reason: String,
    pub timestamp: i64,
    pub expires: i64,
    pub host: String,
}

/// Raw `rules` row; parsed into a `RateRule` by the rule engine.
#[derive(Debug, Clone)]
pub struct StoredRule {
    pub id: i64,
    pub description: String,
    pub aggtype: String,
    pub limit: i64,
    pub duration: String,
    pub filters: String,
}

/// Append-only audit trail row.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub ip: String,
    pub event: String,
    pub timestamp: i64,
}

/// Handle to the SQLite store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database and make sure the schema
    /// exists. Returns the store and whether the database was freshly
    /// initialized, so the caller can seed default entries.
    pub async fn connect(url: &str) -> BlockdResult<(Self, bool)> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(BlockdError::Persistence)?
            .create_if_missing(true);
        // Single connection: one authoritative process owns the registries,
        // and in-memory databases are per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let fresh = !table_exists(&pool, "rules").await?;
        if fresh {
            info!(database = url, "empty database, initializing tables");
            sqlx::query(CREATE_RULES).execute(&pool).await?;
            sqlx::query(CREATE_LISTS).execute(&pool).await?;
            sqlx::query(CREATE_AUDIT).execute(&pool).await?;
        }

        Ok((Self { pool }, fresh))
    }

    /// Close the connection pool. Every operation afterwards fails with a
    /// `Persistence` error, so this runs last during shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Fetch every list row of the given kind, in insertion order.
    pub async fn fetch_entries(&self, kind: ListKind) -> BlockdResult<Vec<StoredEntry>> {
        let rows = sqlx::query_as::<_, (String, String, String, i64, i64, String)>(
            r#"
            SELECT "type", ip, reason, timestamp, expires, host
            FROM lists WHERE "type" = ? ORDER BY id
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(kind, ip, reason, timestamp, expires, host)| StoredEntry {
                kind,
                ip,
                reason,
                timestamp,
                expires,
                host,
            })
            .collect())
    }

    pub async fn insert_entry(&self, kind: ListKind, entry: &IpEntry) -> BlockdResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lists ("type", ip, reason, timestamp, expires, host)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kind.as_str())
        .bind(&entry.ip)
        .bind(&entry.reason)
        .bind(entry.timestamp)
        .bind(entry.expires)
        .bind(&entry.host)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_entry(&self, kind: ListKind, ip: &str) -> BlockdResult<()> {
        sqlx::query(r#"DELETE FROM lists WHERE "type" = ? AND ip = ?"#)
            .bind(kind.as_str())
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch every persisted ban rule.
    pub async fn fetch_rules(&self) -> BlockdResult<Vec<StoredRule>> {
        let rows = sqlx::query_as::<_, (i64, String, String, i64, String, Option<String>)>(
            r#"
            SELECT id, description, aggtype, "limit", duration, filters
            FROM rules ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, description, aggtype, limit, duration, filters)| StoredRule {
                id,
                description,
                aggtype,
                limit,
                duration,
                filters: filters.unwrap_or_default(),
            })
            .collect())
    }

    /// Insert a rule on behalf of the management surface. Returns the new id.
    pub async fn insert_rule(
        &self,
        description: &str,
        aggtype: &str,
        limit: i64,
        duration: &str,
        filters: &str,
    ) -> BlockdResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO rules (description, aggtype, "limit", duration, filters)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(description)
        .bind(aggtype)
        .bind(limit)
        .bind(duration)
        .bind(filters)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Delete a rule by id. Absent ids report `NotFound`, which callers
    /// generally treat as an idempotent no-op.
    pub async fn delete_rule(&self, id: i64) -> BlockdResult<()> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BlockdError::NotFound(format!("rule #{id}")));
        }
        Ok(())
    }

    /// Append an audit record. The audit log is never mutated or pruned.
    pub async fn append_audit(&self, ip: &str, event: &str) -> BlockdResult<()> {
        sqlx::query("INSERT INTO auditlog (ip, event, timestamp) VALUES (?, ?, ?)")
            .bind(ip)
            .bind(event)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recent audit records, newest first, for the display surface.
    pub async fn fetch_audit(&self, limit: i64) -> BlockdResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT ip, event, timestamp FROM auditlog ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(ip, event, timestamp)| AuditRecord {
                ip,
                event,
                timestamp,
            })
            .collect())
    }
}

async fn table_exists(pool: &SqlitePool, name: &str) -> BlockdResult<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}
