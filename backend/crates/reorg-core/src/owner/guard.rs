//! Owner-only execution guard.
//!
//! Only the DDL owner may dispatch jobs. The guard is the check the job loop
//! makes before every dispatch; losing ownership mid-dispatch is observed
//! through the owner's stop token instead.

use super::manager::OwnerManager;
use reorg_commons::NodeId;
use std::sync::Arc;

/// Result of checking ownership
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipStatus {
    /// This node is the owner and can execute jobs
    IsOwner,
    /// This node is not the owner
    NotOwner {
        /// The owner's node ID, if known
        owner: Option<NodeId>,
    },
}

#[derive(Clone)]
pub struct OwnerGuard {
    owner: Arc<dyn OwnerManager>,
    node_id: NodeId,
}

impl OwnerGuard {
    pub fn new(owner: Arc<dyn OwnerManager>) -> Self {
        let node_id = owner.node_id();
        Self { owner, node_id }
    }

    pub fn check_ownership(&self) -> OwnershipStatus {
        if self.owner.is_owner() {
            return OwnershipStatus::IsOwner;
        }
        let owner = match self.owner.current_owner() {
            Ok(owner) => owner,
            Err(err) => {
                log::debug!("Node {} could not read current owner: {}", self.node_id, err);
                None
            }
        };
        OwnershipStatus::NotOwner { owner }
    }

    pub fn is_owner(&self) -> bool {
        self.owner.is_owner()
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::mock::MockOwnerManager;

    #[test]
    fn test_check_ownership_follows_manager() {
        let manager = Arc::new(MockOwnerManager::new(NodeId::new(3)));
        let guard = OwnerGuard::new(manager.clone());
        assert_eq!(guard.check_ownership(), OwnershipStatus::IsOwner);
        assert_eq!(guard.node_id(), NodeId::new(3));

        manager.revoke();
        assert_eq!(
            guard.check_ownership(),
            OwnershipStatus::NotOwner { owner: None }
        );
    }
}
