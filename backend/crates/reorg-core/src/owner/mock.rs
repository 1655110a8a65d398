use super::manager::OwnerManager;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use reorg_commons::NodeId;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct MockState {
    is_owner: bool,
    closed: bool,
    token: CancellationToken,
}

/// Owner manager for single-node setups and tests: owner from the start until
/// revoked or closed.
pub struct MockOwnerManager {
    node_id: NodeId,
    lease: Duration,
    state: Mutex<MockState>,
}

impl MockOwnerManager {
    pub fn new(node_id: NodeId) -> Self {
        Self::with_lease(node_id, Duration::ZERO)
    }

    /// Report `lease` as the lease TTL, which selects the non-local wait
    /// timeout in the bounded executor.
    pub fn with_lease(node_id: NodeId, lease: Duration) -> Self {
        Self {
            node_id,
            lease,
            state: Mutex::new(MockState {
                is_owner: true,
                closed: false,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Simulate lease loss: cancels the current term, `campaign` can win again.
    pub fn revoke(&self) {
        let mut state = self.state.lock();
        if state.is_owner {
            state.is_owner = false;
            state.token.cancel();
            log::warn!("Node {} ownership revoked", self.node_id);
        }
    }
}

#[async_trait]
impl OwnerManager for MockOwnerManager {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn is_owner(&self) -> bool {
        self.state.lock().is_owner
    }

    async fn campaign(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(false);
        }
        if !state.is_owner {
            state.is_owner = true;
            state.token = CancellationToken::new();
        }
        Ok(true)
    }

    fn stop_token(&self) -> CancellationToken {
        self.state.lock().token.clone()
    }

    async fn resign(&self) -> Result<()> {
        self.revoke();
        Ok(())
    }

    async fn close(&self) {
        self.revoke();
        self.state.lock().closed = true;
    }

    fn current_owner(&self) -> Result<Option<NodeId>> {
        Ok(self.is_owner().then_some(self.node_id))
    }

    fn lease(&self) -> Duration {
        self.lease
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_revoke_cancels_term_and_campaign_restores() {
        let owner = MockOwnerManager::new(NodeId::new(1));
        let token = owner.stop_token();
        owner.revoke();
        assert!(token.is_cancelled());
        assert!(!owner.is_owner());

        assert!(owner.campaign().await.unwrap());
        assert!(!owner.stop_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_closed_owner_cannot_campaign() {
        let owner = MockOwnerManager::new(NodeId::new(1));
        owner.close().await;
        assert!(!owner.campaign().await.unwrap());
        assert_eq!(owner.current_owner().unwrap(), None);
    }
}
