//! Storage Engine
//!
//! Store contract, in-memory backend, partition views and the monitored
//! wrapper that adds eviction to plain stores.

mod contract;
mod memory;
mod monitored;
mod namespaced;
mod partition;

pub use contract::{
    ensure_key, ExpirableStore, ObjectStore, PartitionedStore, DEFAULT_PARTITION,
};
pub use memory::{InMemoryStore, MemoryObjectStore};
pub use monitored::{MonitoredStore, StampedEntry};
pub use namespaced::{qualify, unqualify, NamespacedStore};
pub use partition::PartitionView;
