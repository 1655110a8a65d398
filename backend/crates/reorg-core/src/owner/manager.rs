//! DDL owner election.
//!
//! Exactly one node at a time may run DDL jobs. Ownership is a lease record
//! in the shared store, `{owner, expires_at_ms}`, won with a conditional
//! transaction: a node may write it only if it is absent, expired, or already
//! its own. Two nodes racing for the same expired lease conflict at commit and
//! only one of them wins.
//!
//! The winner renews the lease every `renew_interval`. If it cannot renew
//! before the lease expires, it revokes its own ownership: the stop token of
//! the current term is cancelled, which aborts any bounded wait in progress.
//! Each term gets a fresh token.

use crate::error::{ReorgError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reorg_commons::NodeId;
use reorg_store::{run_in_new_txn, Partition, StorageBackend, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const OWNER_PARTITION: &str = "ddl_owner";
const OWNER_KEY: &[u8] = b"owner";

/// Ownership contract used by the job loop and the bounded executor.
#[async_trait]
pub trait OwnerManager: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Whether this node currently holds a valid lease.
    fn is_owner(&self) -> bool;

    /// Try to become owner. Returns whether this node owns the lease afterwards.
    async fn campaign(&self) -> Result<bool>;

    /// Token of the current term, cancelled when ownership is lost or the node
    /// stops. Not-owner nodes get an already-cancelled token.
    fn stop_token(&self) -> CancellationToken;

    /// Give up ownership, releasing the lease for other nodes.
    async fn resign(&self) -> Result<()>;

    /// Stop for good: resign and refuse further campaigns.
    async fn close(&self);

    /// Node currently holding an unexpired lease, if any.
    fn current_owner(&self) -> Result<Option<NodeId>>;

    /// Lease TTL; zero means local mode (the lease never expires).
    fn lease(&self) -> Duration;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerLease {
    pub owner: NodeId,
    pub expires_at_ms: i64,
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn read_lease(txn: &mut Transaction) -> Result<Option<OwnerLease>> {
    match txn.get(&Partition::new(OWNER_PARTITION), OWNER_KEY)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn write_lease(txn: &mut Transaction, lease: &OwnerLease) -> Result<()> {
    txn.put(
        &Partition::new(OWNER_PARTITION),
        OWNER_KEY,
        serde_json::to_vec(lease)?,
    );
    Ok(())
}

struct Term {
    is_owner: bool,
    expires_at_ms: i64,
    token: CancellationToken,
    renewal: Option<JoinHandle<()>>,
}

/// Store-backed lease owner election.
pub struct LeaseOwnerManager {
    backend: Arc<dyn StorageBackend>,
    node_id: NodeId,
    lease: Duration,
    renew_interval: Duration,
    term: Mutex<Term>,
    closed: AtomicBool,
    weak_self: Weak<LeaseOwnerManager>,
}

impl LeaseOwnerManager {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        node_id: NodeId,
        lease: Duration,
        renew_interval: Duration,
    ) -> Arc<Self> {
        let token = CancellationToken::new();
        token.cancel();
        Arc::new_cyclic(|weak_self| Self {
            backend,
            node_id,
            lease,
            renew_interval,
            term: Mutex::new(Term {
                is_owner: false,
                expires_at_ms: 0,
                token,
                renewal: None,
            }),
            closed: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    pub fn from_config(
        backend: Arc<dyn StorageBackend>,
        config: &reorg_configs::ServerConfig,
    ) -> Arc<Self> {
        Self::new(
            backend,
            NodeId::new(config.node.node_id),
            config.owner.lease().unwrap_or(Duration::ZERO),
            config.owner.renew_interval(),
        )
    }

    fn expiry_from(&self, now: i64) -> i64 {
        if self.lease.is_zero() {
            i64::MAX
        } else {
            now.saturating_add(self.lease.as_millis() as i64)
        }
    }

    /// Write our lease if the store allows it. `Ok(None)` when another node
    /// holds an unexpired lease or won the race at commit.
    fn try_write_lease(&self, renewing: bool) -> Result<Option<i64>> {
        let now = now_ms();
        let lease = OwnerLease {
            owner: self.node_id,
            expires_at_ms: self.expiry_from(now),
        };
        let outcome = run_in_new_txn(&self.backend, false, |txn| -> Result<Option<i64>> {
            match read_lease(txn)? {
                Some(current) if current.owner != self.node_id && current.expires_at_ms > now => {
                    return Ok(None)
                }
                None if renewing => return Ok(None),
                _ => {}
            }
            write_lease(txn, &lease)?;
            Ok(Some(lease.expires_at_ms))
        });
        match outcome {
            Err(ReorgError::Storage(err)) if err.is_conflict() => {
                log::debug!("Node {} lost lease race: {}", self.node_id, err);
                Ok(None)
            }
            other => other,
        }
    }

    fn become_owner(&self, expires_at_ms: i64) {
        let mut term = self.term.lock();
        term.expires_at_ms = expires_at_ms;
        if term.is_owner {
            return;
        }
        term.is_owner = true;
        term.token = CancellationToken::new();
        term.renewal = self.spawn_renewal(term.token.clone());
        log::info!(
            "Node {} became DDL owner (lease {}ms)",
            self.node_id,
            self.lease.as_millis()
        );
    }

    /// Drop ownership locally and cancel the current term.
    fn revoke(&self, reason: &str) {
        let mut term = self.term.lock();
        if !term.is_owner {
            return;
        }
        term.is_owner = false;
        term.token.cancel();
        if let Some(handle) = term.renewal.take() {
            handle.abort();
        }
        log::warn!("Node {} is no longer DDL owner: {}", self.node_id, reason);
    }

    fn lease_expired(&self) -> bool {
        let term = self.term.lock();
        term.is_owner && now_ms() >= term.expires_at_ms
    }

    fn spawn_renewal(&self, token: CancellationToken) -> Option<JoinHandle<()>> {
        if self.lease.is_zero() {
            return None;
        }
        let weak = self.weak_self.clone();
        let interval = self.renew_interval;
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                match manager.try_write_lease(true) {
                    Ok(Some(expires_at_ms)) => {
                        manager.term.lock().expires_at_ms = expires_at_ms;
                        log::trace!("Node {} renewed DDL lease", manager.node_id);
                    }
                    Ok(None) => {
                        manager.revoke("lease taken over by another node");
                        break;
                    }
                    Err(err) => {
                        log::warn!("Node {} failed to renew DDL lease: {}", manager.node_id, err);
                        if manager.lease_expired() {
                            manager.revoke("lease expired before it could be renewed");
                            break;
                        }
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl OwnerManager for LeaseOwnerManager {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn is_owner(&self) -> bool {
        if self.lease_expired() {
            self.revoke("lease expired");
        }
        self.term.lock().is_owner
    }

    async fn campaign(&self) -> Result<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(false);
        }
        match self.try_write_lease(false)? {
            Some(expires_at_ms) => {
                self.become_owner(expires_at_ms);
                Ok(true)
            }
            None => {
                self.revoke("another node holds the lease");
                Ok(false)
            }
        }
    }

    fn stop_token(&self) -> CancellationToken {
        self.term.lock().token.clone()
    }

    async fn resign(&self) -> Result<()> {
        if !self.term.lock().is_owner {
            return Ok(());
        }
        let node_id = self.node_id;
        run_in_new_txn(&self.backend, false, |txn| {
            if let Some(current) = read_lease(txn)? {
                if current.owner == node_id {
                    txn.delete(&Partition::new(OWNER_PARTITION), OWNER_KEY);
                }
            }
            Ok::<_, ReorgError>(())
        })?;
        self.revoke("resigned");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Err(err) = self.resign().await {
            log::warn!("Node {} could not release DDL lease: {}", self.node_id, err);
            self.revoke("closed");
        }
    }

    fn current_owner(&self) -> Result<Option<NodeId>> {
        let now = now_ms();
        let mut txn = Transaction::begin(self.backend.clone());
        let lease = read_lease(&mut txn)?;
        txn.rollback();
        Ok(lease
            .filter(|lease| lease.expires_at_ms > now)
            .map(|lease| lease.owner))
    }

    fn lease(&self) -> Duration {
        self.lease
    }
}
