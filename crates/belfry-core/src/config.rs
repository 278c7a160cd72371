use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::RetryPolicy;

pub const DEFAULT_MAX_WORKERS: usize = 8;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_LEASE_TTL_SECS: u64 = 15;
pub const DEFAULT_QUEUE_DEPTH: usize = 256;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 60;
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 120;
pub const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 120;
/// How long a worker waits on a full dispatch queue before deferring the
/// fire to the next polling cycle (the backpressure valve).
pub const DISPATCH_ENQUEUE_TIMEOUT_MS: u64 = 250;
/// Grace period between cooperative cancellation and forced termination.
pub const CANCEL_KILL_GRACE_SECS: u64 = 5;

/// Top-level config (belfry.toml + BELFRY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BelfryConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// Identity of this replica in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique per replica; appears as `holder_id` in the lease and
    /// `worker_id` on execution rows.
    #[serde(default = "default_node_id")]
    pub id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduling loop, worker pool, and policy defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker pool size.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Leader lease time-to-live. A crashed leader is detected only via
    /// lease expiry, so this bounds the failover staleness window.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
    /// Fire-loop and lease re-acquisition cadence.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Bound on the in-memory dispatch queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Applied when a job definition does not set its own grace.
    #[serde(default = "default_misfire_grace")]
    pub default_misfire_grace_secs: u64,
    /// Applied when a job definition does not set its own policy.
    #[serde(default)]
    pub default_retry_policy: RetryPolicy,
    /// Execution rows older than this are removed by the cleanup sweep.
    #[serde(default = "default_retention_days")]
    pub history_retention_days: u32,
    /// TTL of dispatch dedup fingerprints.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    /// Job-submission cap at the API boundary; excess is rejected with a
    /// throttling error.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            lease_ttl_secs: default_lease_ttl(),
            poll_interval_secs: default_poll_interval(),
            queue_depth: default_queue_depth(),
            default_misfire_grace_secs: default_misfire_grace(),
            default_retry_policy: RetryPolicy::default(),
            history_retention_days: default_retention_days(),
            dedup_window_secs: default_dedup_window(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

/// Outbound notification transports. Log-only delivery is always on;
/// the webhook transport is enabled by configuring a URL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationsConfig {
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint receiving one POST per lifecycle event.
    pub url: String,
    /// When set, payloads carry an HMAC-SHA256 signature header
    /// (`X-Belfry-Signature-256: sha256=<hex>`).
    pub secret: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_node_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "belfry".to_string());
    format!("{}-{}", host, std::process::id())
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.belfry/belfry.db", home)
}
fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}
fn default_lease_ttl() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}
fn default_misfire_grace() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_retention_days() -> u32 {
    DEFAULT_HISTORY_RETENTION_DAYS
}
fn default_dedup_window() -> u64 {
    DEFAULT_DEDUP_WINDOW_SECS
}
fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT_PER_MINUTE
}
fn default_webhook_timeout() -> u64 {
    10
}

impl BelfryConfig {
    /// Load config from a TOML file with BELFRY_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.belfry/belfry.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: BelfryConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BELFRY_").split("_"))
            .extract()
            .map_err(|e| crate::error::BelfryError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.belfry/belfry.toml", home)
}
