#![allow(dead_code)] // not every test binary uses every helper

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use blockd::config::Settings;
use blockd::core::Context;
use blockd::error::{BlockdError, BlockdResult};
use blockd::search::{SearchBackend, AGG_NAME};

/// Backend stub: every date partition exists and every search returns the
/// canned buckets.
pub struct StubBackend {
    buckets: Value,
}

impl StubBackend {
    /// A backend reporting the given `(address, count)` pairs.
    pub fn with_counts(pairs: &[(&str, u64)]) -> Self {
        let buckets: Vec<Value> = pairs
            .iter()
            .map(|(ip, count)| json!({ "key": ip, "doc_count": count }))
            .collect();
        Self {
            buckets: Value::Array(buckets),
        }
    }
}

#[async_trait]
impl SearchBackend for StubBackend {
    async fn index_exists(&self, _index: &str) -> BlockdResult<bool> {
        Ok(true)
    }

    async fn search(&self, _indices: &str, _body: &Value) -> BlockdResult<Value> {
        Ok(json!({ "aggregations": { AGG_NAME: { "buckets": self.buckets.clone() } } }))
    }
}

/// Backend stub that always fails as if the search timed out.
pub struct UnreachableBackend;

#[async_trait]
impl SearchBackend for UnreachableBackend {
    async fn index_exists(&self, _index: &str) -> BlockdResult<bool> {
        Err(BlockdError::SearchUnavailable("connection timed out".into()))
    }

    async fn search(&self, _indices: &str, _body: &Value) -> BlockdResult<Value> {
        Err(BlockdError::SearchUnavailable("connection timed out".into()))
    }
}

/// Fresh context over an in-memory store, seeded with the default allow
/// ranges.
pub async fn test_context(backend: impl SearchBackend + 'static) -> Arc<Context> {
    blockd::utils::init_logging();
    let settings = Settings {
        database_url: "sqlite::memory:".to_string(),
        ..Settings::default()
    };
    Context::initialize(settings, Arc::new(backend))
        .await
        .expect("context should initialize against an in-memory store")
}

/// A random address in the 198.51.100.0/24 documentation range, safely
/// disjoint from the seeded default allow ranges.
pub fn random_doc_ip() -> String {
    format!("198.51.100.{}", rand::random::<u8>())
}
