//! Fire-and-forget notification sink.
//!
//! One POST per successful add(), payload `{"<kind>": <entry>}` to a
//! per-kind endpoint path. Delivery is dispatched as an independent task,
//! never awaited by the triggering add(); anything but an Accepted status
//! is logged and discarded.

use std::time::Duration;

use reqwest::{Client as ReqwestClient, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use crate::core::entry::{IpEntry, ListKind};
use crate::error::{BlockdError, BlockdResult};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials and endpoint for the notification sink.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PubsubSettings {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Handle used by the registries to announce list changes.
#[derive(Clone)]
pub struct Notifier {
    client: ReqwestClient,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
}

impl Notifier {
    pub fn new(settings: &PubsubSettings) -> BlockdResult<Self> {
        let client = ReqwestClient::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| BlockdError::Notification(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            user: settings.user.clone(),
            password: settings.password.clone(),
        })
    }

    /// Announce a new entry. Returns immediately; delivery happens on its
    /// own task and failure is never surfaced to the caller.
    pub fn publish(&self, kind: ListKind, entry: &IpEntry) {
        let notifier = self.clone();
        let entry = entry.clone();
        tokio::spawn(async move {
            match notifier.deliver(kind, &entry).await {
                Ok(()) => debug!(ip = %entry.ip, kind = %kind, "list change published"),
                Err(e) => warn!(ip = %entry.ip, kind = %kind, error = %e, "could not publish list change"),
            }
        });
    }

    async fn deliver(&self, kind: ListKind, entry: &IpEntry) -> BlockdResult<()> {
        let url = format!("{}/blockd/{}", self.base_url, kind);
        let payload = json!({ kind.as_str(): entry });

        let mut request = self.client.post(&url).json(&payload);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BlockdError::Notification(e.to_string()))?;

        // The sink signals acceptance with 202; everything else is a failure.
        if response.status() != StatusCode::ACCEPTED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BlockdError::Notification(format!(
                "sink responded {status}: {body}"
            )));
        }
        Ok(())
    }
}
