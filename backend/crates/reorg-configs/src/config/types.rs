use super::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub reorg: ReorgSettings,
    #[serde(default)]
    pub owner: OwnerSettings,
    #[serde(default)]
    pub jobs: JobsSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Identifier of this node in the DDL owner election
    #[serde(default = "default_node_id")]
    pub node_id: u64,
}

/// Backfill (reorganization) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorgSettings {
    /// How long one dispatch waits for a running backfill before checkpointing
    /// and yielding (default: 5000ms)
    #[serde(default = "default_reorg_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Same as `wait_timeout_ms` but used when the owner lease is zero
    /// (single-node local storage, default: 10000ms)
    #[serde(default = "default_reorg_local_wait_timeout_ms")]
    pub local_wait_timeout_ms: u64,

    /// Rows per backfill batch, each batch is one transaction (default: 256)
    #[serde(default = "default_reorg_batch_size")]
    pub batch_size: usize,

    /// Pause between backfill batches, throttles the backfill (default: 0)
    #[serde(default)]
    pub batch_delay_ms: u64,
}

/// DDL owner election settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerSettings {
    /// Ownership lease TTL in milliseconds. Zero means local mode: ownership
    /// never expires (default: 45000ms)
    #[serde(default = "default_owner_lease_ms")]
    pub lease_ms: u64,

    /// How often the owner renews its lease (default: lease / 3)
    #[serde(default = "default_owner_renew_interval_ms")]
    pub renew_interval_ms: u64,
}

/// DDL job loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSettings {
    /// Job loop tick when idle (default: 1000ms)
    #[serde(default = "default_jobs_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before re-dispatching a job whose wait timed out (default: 100ms)
    #[serde(default = "default_jobs_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Consecutive non-fatal errors before the job is rolled back (default: 512)
    #[serde(default = "default_jobs_max_error_count")]
    pub max_error_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub log_to_console: bool,
    /// Optional log file; console only when unset
    #[serde(default)]
    pub file_path: Option<String>,
    /// Optional per-target log level overrides
    /// [logging.targets]
    /// reorg_core = "debug"
    #[serde(default)]
    pub targets: HashMap<String, String>,
}

impl ReorgSettings {
    /// Bounded wait for one dispatch. Local mode (`lease_ms == 0`) waits longer.
    pub fn wait_timeout(&self, lease_ms: u64) -> Duration {
        if lease_ms == 0 {
            Duration::from_millis(self.local_wait_timeout_ms)
        } else {
            Duration::from_millis(self.wait_timeout_ms)
        }
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl OwnerSettings {
    pub fn lease(&self) -> Option<Duration> {
        (self.lease_ms > 0).then(|| Duration::from_millis(self.lease_ms))
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
        }
    }
}

impl Default for ReorgSettings {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_reorg_wait_timeout_ms(),
            local_wait_timeout_ms: default_reorg_local_wait_timeout_ms(),
            batch_size: default_reorg_batch_size(),
            batch_delay_ms: 0,
        }
    }
}

impl Default for OwnerSettings {
    fn default() -> Self {
        Self {
            lease_ms: default_owner_lease_ms(),
            renew_interval_ms: default_owner_renew_interval_ms(),
        }
    }
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_jobs_poll_interval_ms(),
            retry_backoff_ms: default_jobs_retry_backoff_ms(),
            max_error_count: default_jobs_max_error_count(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_to_console: default_true(),
            file_path: None,
            targets: HashMap::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            node: NodeSettings::default(),
            reorg: ReorgSettings::default(),
            owner: OwnerSettings::default(),
            jobs: JobsSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
