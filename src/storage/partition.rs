//! Partition View
//!
//! Presents one partition of a partitioned backend as a plain store.

use std::sync::Arc;

use super::contract::{ObjectStore, PartitionedStore, DEFAULT_PARTITION};
use crate::error::StoreResult;

/// One named partition of a shared backend
pub struct PartitionView<V> {
    backend: Arc<dyn PartitionedStore<V>>,
    partition: String,
}

impl<V> PartitionView<V> {
    pub fn new(backend: Arc<dyn PartitionedStore<V>>, partition: impl Into<String>) -> Self {
        Self {
            backend,
            partition: partition.into(),
        }
    }

    /// View over the backend's default partition
    pub fn default_partition(backend: Arc<dyn PartitionedStore<V>>) -> Self {
        Self::new(backend, DEFAULT_PARTITION)
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn backend(&self) -> &Arc<dyn PartitionedStore<V>> {
        &self.backend
    }
}

impl<V> ObjectStore<V> for PartitionView<V>
where
    V: Send + Sync,
{
    fn contains(&self, key: &str) -> StoreResult<bool> {
        self.backend.contains(key, &self.partition)
    }

    fn store(&self, key: &str, value: V) -> StoreResult<()> {
        self.backend.store(key, value, &self.partition)
    }

    fn retrieve(&self, key: &str) -> StoreResult<V> {
        self.backend.retrieve(key, &self.partition)
    }

    fn remove(&self, key: &str) -> StoreResult<V> {
        self.backend.remove(key, &self.partition)
    }

    fn clear(&self) -> StoreResult<()> {
        self.backend.clear(&self.partition)
    }

    fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.backend.all_keys(&self.partition)
    }

    fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    fn open(&self) -> StoreResult<()> {
        self.backend.open()?;
        self.backend.open_partition(&self.partition)
    }

    fn close(&self) -> StoreResult<()> {
        self.backend.close_partition(&self.partition)
    }
}
