//! Cluster Module
//!
//! Leadership signal for multi-node deployments. Every node serves reads and
//! writes locally; only the primary runs eviction sweeps over shared stores.

pub mod node;

pub use node::{ClusterNode, NodeId, NodeRole};

/// Answers whether this node currently owns shared periodic work.
pub trait PrimaryPolling: Send + Sync {
    fn is_primary(&self) -> bool;
}

/// Single-node deployment: always primary
#[derive(Debug, Clone, Copy, Default)]
pub struct Standalone;

impl PrimaryPolling for Standalone {
    fn is_primary(&self) -> bool {
        true
    }
}
