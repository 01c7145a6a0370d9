//! STOWAGE - Named Object Stores with Bounded Retention
//!
//! Keyed stores handed out by name from a process-wide manager, backed by a
//! shared in-memory or on-disk partitioned backend, with optional size and
//! age limits enforced by one background eviction scheduler.

pub mod cluster;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod persistence;
pub mod scheduler;
pub mod storage;

pub use cluster::{ClusterNode, NodeRole, PrimaryPolling, Standalone};
pub use config::{ManagerConfig, StoreSettings, UNBOUNDED};
pub use error::{StoreError, StoreResult};
pub use manager::{Backend, StoreManager, StoreManagerBuilder};
pub use metrics::StoreMetrics;
pub use persistence::{BincodeSerializer, JsonSerializer, Persistable, PersistentStore};
pub use scheduler::{Scheduler, TaskHandle};
pub use storage::{
    ExpirableStore, InMemoryStore, MemoryObjectStore, MonitoredStore, ObjectStore,
    PartitionView, PartitionedStore, StampedEntry,
};
