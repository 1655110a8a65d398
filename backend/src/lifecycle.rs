//! Server lifecycle management helpers.
//!
//! Bootstraps one node (store, owner election, DDL worker), runs the job loop
//! in the background and coordinates graceful shutdown.

use anyhow::Result;
use log::{info, warn};
use reorg_configs::ServerConfig;
use reorg_core::{DdlWorker, LeaseOwnerManager, OwnerManager};
use reorg_store::{InMemoryBackend, StorageBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long shutdown waits for the job loop to notice the stop signal.
const LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Components of one running node.
pub struct Node {
    pub config: ServerConfig,
    pub backend: Arc<dyn StorageBackend>,
    pub owner: Arc<LeaseOwnerManager>,
    pub worker: Arc<DdlWorker>,
}

/// Bootstrap a node over a fresh in-memory store.
pub fn bootstrap(config: &ServerConfig) -> Node {
    bootstrap_with_backend(config, Arc::new(InMemoryBackend::new()))
}

/// Bootstrap a node over an existing store. Nodes sharing one store elect a
/// single DDL owner between them.
pub fn bootstrap_with_backend(config: &ServerConfig, backend: Arc<dyn StorageBackend>) -> Node {
    let owner = LeaseOwnerManager::from_config(backend.clone(), config);
    let worker = Arc::new(DdlWorker::from_config(
        backend.clone(),
        owner.clone(),
        config,
    ));
    info!(
        "Node {} bootstrapped: lease={}ms, wait_timeout={}ms, batch_size={}",
        config.node.node_id,
        config.owner.lease_ms,
        config.reorg.wait_timeout(config.owner.lease_ms).as_millis(),
        config.reorg.batch_size
    );
    Node {
        config: config.clone(),
        backend,
        owner,
        worker,
    }
}

impl Node {
    /// Spawn the DDL job loop.
    pub fn start(&self) -> JoinHandle<reorg_core::Result<()>> {
        let worker = self.worker.clone();
        tokio::spawn(async move { worker.run_loop().await })
    }

    /// Stop the job loop, then give up ownership so another node can take
    /// over from the last checkpoint.
    pub async fn stop(&self, job_loop: JoinHandle<reorg_core::Result<()>>) {
        info!("Stopping node {}", self.config.node.node_id);
        self.worker.shutdown();

        match tokio::time::timeout(LOOP_STOP_TIMEOUT, job_loop).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("DDL job loop exited with error: {}", e),
            Ok(Err(e)) => warn!("DDL job loop task failed: {}", e),
            Err(_) => warn!(
                "DDL job loop did not stop within {}s",
                LOOP_STOP_TIMEOUT.as_secs()
            ),
        }

        self.owner.close().await;
        info!("Node {} stopped", self.config.node.node_id);
    }
}

/// Run a node until Ctrl+C.
pub async fn run(config: &ServerConfig) -> Result<()> {
    let node = bootstrap(config);
    let mut job_loop = node.start();

    tokio::select! {
        result = &mut job_loop => {
            match result {
                Ok(Ok(())) => info!("DDL job loop finished"),
                Ok(Err(e)) => log::error!("DDL job loop failed: {}", e),
                Err(e) => log::error!("DDL job loop task failed: {}", e),
            }
            node.owner.close().await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
            node.stop(job_loop).await;
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(node_id: u64) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.node.node_id = node_id;
        config.owner.lease_ms = 300;
        config.owner.renew_interval_ms = 100;
        config.jobs.poll_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_node_wins_ownership_and_releases_it_on_stop() {
        let node = bootstrap(&config(1));
        let job_loop = node.start();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !node.owner.is_owner() {
            assert!(tokio::time::Instant::now() < deadline, "never became owner");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        node.stop(job_loop).await;
        assert!(!node.owner.is_owner());
        assert_eq!(node.owner.current_owner().unwrap(), None);
    }
}
