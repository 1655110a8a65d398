// ReorgDB Server entrypoint
//!
//! Node bootstrap and graceful shutdown live in `lifecycle` so this file
//! remains a thin orchestrator.

use anyhow::Result;
use log::info;
use reorg_configs::ServerConfig;
use reorg_server::{lifecycle, logging};
use std::env;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional first argument: path to the config file
    let config_path = env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());

    let mut config = if Path::new(&config_path).exists() {
        match ServerConfig::from_file(&config_path) {
            Ok(cfg) => {
                eprintln!("Loaded config from: {}", config_path);
                cfg
            }
            Err(e) => {
                eprintln!("FATAL: Failed to load {}: {}", config_path, e);
                std::process::exit(1);
            }
        }
    } else {
        eprintln!("No config file at {}, using defaults", config_path);
        ServerConfig::default()
    };
    config.apply_env_overrides()?;
    config.finalize()?;

    // Logging before any other side effects
    logging::init_logging(&config.logging)?;

    info!(
        "ReorgDB Server v{} (commit {}, branch {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("GIT_BRANCH"),
        env!("BUILD_DATE")
    );
    info!(
        "Node {}: owner lease {}ms, renew every {}ms",
        config.node.node_id, config.owner.lease_ms, config.owner.renew_interval_ms
    );

    lifecycle::run(&config).await
}
