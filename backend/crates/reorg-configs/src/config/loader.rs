use super::types::ServerConfig;
use std::fs;
use std::path::Path;

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
const VALID_LOG_FORMATS: [&str; 2] = ["compact", "json"];

impl ServerConfig {
    /// Load configuration from a TOML file
    ///
    /// Note: Environment overrides are applied separately via `apply_env_overrides()`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let mut config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

        config.finalize()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - REORG_NODE_ID: Override node.node_id
    /// - REORG_OWNER_LEASE_MS: Override owner.lease_ms
    /// - REORG_WAIT_TIMEOUT_MS: Override reorg.wait_timeout_ms
    /// - REORG_LOG_LEVEL: Override logging.level
    /// - REORG_LOG_FILE: Override logging.file_path
    /// - REORG_LOG_TO_CONSOLE: Override logging.log_to_console
    ///
    /// Environment variables take precedence over config.toml values.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        use std::env;

        if let Ok(val) = env::var("REORG_NODE_ID") {
            self.node.node_id = val
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid REORG_NODE_ID value: {}", val))?;
        }

        if let Ok(val) = env::var("REORG_OWNER_LEASE_MS") {
            self.owner.lease_ms = val
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid REORG_OWNER_LEASE_MS value: {}", val))?;
        }

        if let Ok(val) = env::var("REORG_WAIT_TIMEOUT_MS") {
            self.reorg.wait_timeout_ms = val
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid REORG_WAIT_TIMEOUT_MS value: {}", val))?;
        }

        if let Ok(level) = env::var("REORG_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(path) = env::var("REORG_LOG_FILE") {
            self.logging.file_path = Some(path);
        }

        if let Ok(val) = env::var("REORG_LOG_TO_CONSOLE") {
            let val = val.to_lowercase();
            self.logging.log_to_console = val == "true" || val == "1" || val == "yes";
        }

        Ok(())
    }

    /// Validate configuration. Call this after applying environment overrides.
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        self.logging.level = self.logging.level.to_lowercase();
        self.validate()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reorg.wait_timeout_ms == 0 || self.reorg.local_wait_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Reorg wait timeouts must be greater than 0"));
        }

        if self.reorg.batch_size == 0 {
            return Err(anyhow::anyhow!("reorg.batch_size must be greater than 0"));
        }

        if self.owner.lease_ms > 0 && self.owner.renew_interval_ms >= self.owner.lease_ms {
            return Err(anyhow::anyhow!(
                "owner.renew_interval_ms ({}) must be shorter than owner.lease_ms ({})",
                self.owner.renew_interval_ms,
                self.owner.lease_ms
            ));
        }

        if self.owner.lease_ms > 0 && self.owner.renew_interval_ms == 0 {
            return Err(anyhow::anyhow!("owner.renew_interval_ms must be greater than 0"));
        }

        if self.jobs.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("jobs.poll_interval_ms must be greater than 0"));
        }

        if self.jobs.max_error_count <= 0 {
            return Err(anyhow::anyhow!("jobs.max_error_count must be greater than 0"));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_LOG_FORMATS.join(", ")
            ));
        }

        for (target, level) in &self.logging.targets {
            if !VALID_LOG_LEVELS.contains(&level.as_str()) {
                return Err(anyhow::anyhow!(
                    "Invalid log level '{}' for target '{}'. Must be one of: {}",
                    level,
                    target,
                    VALID_LOG_LEVELS.join(", ")
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reorg.wait_timeout_ms, 5000);
        assert_eq!(config.owner.renew_interval_ms, 15000);
    }

    #[test]
    fn test_zero_wait_timeout_rejected() {
        let mut config = ServerConfig::default();
        config.reorg.wait_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = ServerConfig::default();
        config.reorg.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_renew_interval_must_be_shorter_than_lease() {
        let mut config = ServerConfig::default();
        config.owner.lease_ms = 1000;
        config.owner.renew_interval_ms = 1000;
        assert!(config.validate().is_err());

        // Local mode has no lease to renew
        config.owner.lease_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = ServerConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "info".to_string();
        config.logging.targets.insert("reorg_core".to_string(), "loud".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wait_timeout_depends_on_lease() {
        let config = ServerConfig::default();
        assert_eq!(config.reorg.wait_timeout(45_000), Duration::from_millis(5000));
        assert_eq!(config.reorg.wait_timeout(0), Duration::from_millis(10_000));
    }

    #[test]
    fn test_from_file_fills_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
node_id = 7

[reorg]
batch_size = 32

[logging]
level = "DEBUG"
format = "json"
"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node.node_id, 7);
        assert_eq!(config.reorg.batch_size, 32);
        assert_eq!(config.reorg.wait_timeout_ms, 5000);
        assert_eq!(config.owner.lease_ms, 45_000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reorg]\nbatch_size = 0").unwrap();
        assert!(ServerConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_override_node_id() {
        std::env::set_var("REORG_NODE_ID", "42");
        let mut config = ServerConfig::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.node.node_id, 42);
        std::env::remove_var("REORG_NODE_ID");
    }
}
