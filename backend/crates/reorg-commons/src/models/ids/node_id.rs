//! Node identifier type for cluster deployments
//!
//! Each ReorgDB server instance has a unique node ID used for:
//! - Owner election (the lease record names the owning node)
//! - Job logging and failover reports

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier for cluster deployments
///
/// Configured via server.toml `[node] node_id = 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Create a new node ID
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the node ID as a u64
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create default node ID (1)
    #[inline]
    pub const fn default_node() -> Self {
        Self(1)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::default_node()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        let node_id = NodeId::new(123);
        assert_eq!(format!("{}", node_id), "123");
    }

    #[test]
    fn test_node_id_default() {
        assert_eq!(NodeId::default().as_u64(), 1);
    }

    #[test]
    fn test_node_id_round_trips_through_u64() {
        let node_id = NodeId::from(456u64);
        let value: u64 = node_id.into();
        assert_eq!(value, 456);
    }
}
