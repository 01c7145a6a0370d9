//! Cluster Node
//!
//! This process's view of its own role, fed by an external leadership signal.

use parking_lot::RwLock;
use std::time::Instant;
use tracing::info;

use super::PrimaryPolling;

/// Unique node identifier
pub type NodeId = u64;

/// Node role in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRole {
    /// Runs shared periodic work
    Leader,
    /// Serves local reads and writes only
    #[default]
    Follower,
}

/// Local cluster membership with a switchable role
#[derive(Debug)]
pub struct ClusterNode {
    id: NodeId,
    role: RwLock<NodeRole>,
    role_changed_at: RwLock<Instant>,
}

impl ClusterNode {
    pub fn new(id: NodeId, role: NodeRole) -> Self {
        Self {
            id,
            role: RwLock::new(role),
            role_changed_at: RwLock::new(Instant::now()),
        }
    }

    /// Create a leader node
    pub fn leader(id: NodeId) -> Self {
        Self::new(id, NodeRole::Leader)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        *self.role.read()
    }

    /// Check if node is leader
    pub fn is_leader(&self) -> bool {
        self.role() == NodeRole::Leader
    }

    /// Time spent in the current role
    pub fn role_age(&self) -> std::time::Duration {
        self.role_changed_at.read().elapsed()
    }

    pub fn promote(&self) {
        self.set_role(NodeRole::Leader);
    }

    pub fn demote(&self) {
        self.set_role(NodeRole::Follower);
    }

    fn set_role(&self, role: NodeRole) {
        let mut current = self.role.write();
        if *current != role {
            info!(node = self.id, from = ?*current, to = ?role, "Node role changed");
            *current = role;
            *self.role_changed_at.write() = Instant::now();
        }
    }
}

impl PrimaryPolling for ClusterNode {
    fn is_primary(&self) -> bool {
        self.is_leader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Standalone;

    #[test]
    fn test_node_roles() {
        let node = ClusterNode::new(1, NodeRole::default());
        assert_eq!(node.role(), NodeRole::Follower);
        assert!(!node.is_primary());

        node.promote();
        assert!(node.is_leader());
        assert!(node.is_primary());

        node.demote();
        assert!(!node.is_primary());
    }

    #[test]
    fn test_role_age_resets_on_change() {
        let node = ClusterNode::leader(7);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let before = node.role_age();

        // Same role: no change
        node.promote();
        assert!(node.role_age() >= before);

        node.demote();
        assert!(node.role_age() < before);
    }

    #[test]
    fn test_standalone_is_primary() {
        assert!(Standalone.is_primary());
    }
}
