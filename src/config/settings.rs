use serde::Deserialize;

use crate::notify::PubsubSettings;

/// Configuration for the blockd daemon, loaded from an optional YAML file
/// and `BLOCKD_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// SQLite database URL for lists, rules and the audit log.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Base URL of the log-analytics backend.
    #[serde(default = "default_search_url")]
    pub elasticsearch_url: String,
    /// strftime pattern naming the backend's date partitions.
    #[serde(default = "default_index_pattern")]
    pub index_pattern: String,
    /// Expiry applied to auto-bans, in seconds.
    #[serde(default = "default_expire_seconds")]
    pub default_expire_seconds: i64,
    /// How often the background scheduler wakes up.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// TTL of the grace-allow entry created when a block expires.
    #[serde(default = "default_grace_allow")]
    pub grace_allow_seconds: i64,
    /// How many top clients each rule evaluation requests.
    #[serde(default = "default_top_hits")]
    pub top_hits: usize,
    /// Notification sink; list changes are not announced when unset.
    #[serde(default)]
    pub pubsub: Option<PubsubSettings>,
}

fn default_database_url() -> String {
    "sqlite://blockd.sqlite".to_string()
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_pattern() -> String {
    "loggy-%Y-%m-%d".to_string()
}

/// Default expiry of auto-bans: 4 months.
fn default_expire_seconds() -> i64 {
    86400 * 30 * 4
}

fn default_sweep_interval() -> u64 {
    15
}

fn default_grace_allow() -> i64 {
    600
}

fn default_top_hits() -> usize {
    100
}

impl Settings {
    /// Load configuration from `blockd.yaml` (when present) and the
    /// environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("blockd").required(false))
            .add_source(config::Environment::with_prefix("BLOCKD"));
        builder.build()?.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            elasticsearch_url: default_search_url(),
            index_pattern: default_index_pattern(),
            default_expire_seconds: default_expire_seconds(),
            sweep_interval_seconds: default_sweep_interval(),
            grace_allow_seconds: default_grace_allow(),
            top_hits: default_top_hits(),
            pubsub: None,
        }
    }
}
