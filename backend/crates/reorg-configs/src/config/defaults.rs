//! Default values for configuration fields.

// Node defaults
pub fn default_node_id() -> u64 {
    1
}

// Reorg defaults
pub fn default_reorg_wait_timeout_ms() -> u64 {
    5_000 // 5s bounded wait per dispatch
}

pub fn default_reorg_local_wait_timeout_ms() -> u64 {
    10_000 // local storage never loses its owner, so wait longer
}

pub fn default_reorg_batch_size() -> usize {
    256
}

// Owner defaults
pub fn default_owner_lease_ms() -> u64 {
    45_000
}

pub fn default_owner_renew_interval_ms() -> u64 {
    default_owner_lease_ms() / 3
}

// Jobs defaults
pub fn default_jobs_poll_interval_ms() -> u64 {
    1_000
}

pub fn default_jobs_retry_backoff_ms() -> u64 {
    100 // 100ms between re-dispatches of a timed-out job
}

pub fn default_jobs_max_error_count() -> i64 {
    512
}

// Logging defaults
pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "compact".to_string()
}

pub fn default_true() -> bool {
    true
}
