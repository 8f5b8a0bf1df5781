use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde_json::Value;
use tracing::warn;

use crate::error::{BlockdError, BlockdResult};

#[cfg(test)]
use mockall::automock;

/// Query timeout handed to the backend and to the HTTP client.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What the rule engine needs from the log-analytics backend.
///
/// Every failure is reported as `SearchUnavailable`; callers treat it as a
/// transient condition and retry on the next scheduler pass.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Whether a date partition exists in the backend.
    async fn index_exists(&self, index: &str) -> BlockdResult<bool>;

    /// Run an aggregation query against one or more comma-separated
    /// partitions and return the raw JSON response.
    async fn search(&self, indices: &str, body: &Value) -> BlockdResult<Value>;
}

/// HTTP client for an Elasticsearch-compatible backend.
pub struct EsClient {
    client: ReqwestClient,
    base_url: String,
}

impl EsClient {
    pub fn new(base_url: &str) -> BlockdResult<Self> {
        let client = ReqwestClient::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| BlockdError::SearchUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Startup sanity check: the backend must answer and report a major
    /// version of at least 7. Fatal at initialization time only.
    pub async fn ensure_version(&self) -> BlockdResult<String> {
        let info: Value = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(transient)?
            .json()
            .await
            .map_err(transient)?;

        let version = info
            .pointer("/version/number")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BlockdError::SearchUnavailable("backend did not report a version".into())
            })?;
        let major: u32 = version
            .split('.')
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|_| {
                BlockdError::SearchUnavailable(format!("unparseable backend version {version}"))
            })?;
        if major < 7 {
            return Err(BlockdError::SearchUnavailable(format!(
                "backend version {version} is too old, 7.x or higher required"
            )));
        }
        Ok(version.to_string())
    }
}

#[async_trait]
impl SearchBackend for EsClient {
    async fn index_exists(&self, index: &str) -> BlockdResult<bool> {
        let url = format!("{}/{}", self.base_url, index);
        let response = self.client.head(&url).send().await.map_err(transient)?;
        Ok(response.status().is_success())
    }

    async fn search(&self, indices: &str, body: &Value) -> BlockdResult<Value> {
        let url = format!("{}/{}/_search", self.base_url, indices);
        let response = self
            .client
            .post(&url)
            .query(&[("timeout", "30s")])
            .json(body)
            .send()
            .await
            .map_err(transient)?;

        // 5xx answers (shard failures, overload) are retry-next-pass
        // conditions just like timeouts.
        let status = response.status();
        if status.is_server_error() {
            return Err(BlockdError::SearchUnavailable(format!(
                "backend responded {status}"
            )));
        }
        // A 4xx body carries an error document instead of aggregations;
        // flag it so a misconfigured rule does not look like a quiet sweep.
        if !status.is_success() {
            warn!(%status, indices, "backend rejected search request");
        }

        response.json().await.map_err(transient)
    }
}

fn transient(e: reqwest::Error) -> BlockdError {
    BlockdError::SearchUnavailable(e.to_string())
}
