//! Store Contract
//!
//! The operation set every backend offers, in unpartitioned and
//! partitioned flavors, plus the native eviction capability.

use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Partition used when a store is accessed without naming one.
pub const DEFAULT_PARTITION: &str = "DEFAULT_PARTITION";

/// Reject keys no backend can address.
#[inline]
pub fn ensure_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::empty_key());
    }
    Ok(())
}

/// Keyed store of values of type `V`.
///
/// All implementations uphold:
/// - An empty key fails with `InvalidArgument` on every keyed operation.
/// - `store` never overwrites; a present key fails with `AlreadyExists`.
/// - `retrieve` and `remove` on an absent key fail with `DoesNotExist`.
/// - `open` and `close` are idempotent.
pub trait ObjectStore<V>: Send + Sync {
    /// Check whether `key` is present. No side effects.
    fn contains(&self, key: &str) -> StoreResult<bool>;

    /// Store a new entry.
    fn store(&self, key: &str, value: V) -> StoreResult<()>;

    /// Return a copy of the value stored under `key`.
    fn retrieve(&self, key: &str) -> StoreResult<V>;

    /// Delete the entry and return its value.
    fn remove(&self, key: &str) -> StoreResult<V>;

    /// Remove every entry. A no-op on an empty store.
    fn clear(&self) -> StoreResult<()>;

    /// Snapshot of the keys currently present, in storage order.
    fn all_keys(&self) -> StoreResult<Vec<String>>;

    /// Whether entries survive a process restart.
    fn is_persistent(&self) -> bool;

    fn open(&self) -> StoreResult<()> {
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Store whose key space is split into named, independently cleared partitions.
pub trait PartitionedStore<V>: Send + Sync {
    fn contains(&self, key: &str, partition: &str) -> StoreResult<bool>;

    fn store(&self, key: &str, value: V, partition: &str) -> StoreResult<()>;

    fn retrieve(&self, key: &str, partition: &str) -> StoreResult<V>;

    fn remove(&self, key: &str, partition: &str) -> StoreResult<V>;

    fn clear(&self, partition: &str) -> StoreResult<()>;

    fn all_keys(&self, partition: &str) -> StoreResult<Vec<String>>;

    /// Names of the partitions currently known to the backend.
    fn all_partitions(&self) -> StoreResult<Vec<String>>;

    fn is_persistent(&self) -> bool;

    /// Make the backend itself ready for use.
    fn open(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Ensure `partition` exists and is ready for use.
    fn open_partition(&self, partition: &str) -> StoreResult<()>;

    /// Release per-partition resources. Data is kept.
    fn close_partition(&self, partition: &str) -> StoreResult<()>;

    /// Delete the partition and all of its data, leaving siblings untouched.
    fn dispose_partition(&self, partition: &str) -> StoreResult<()>;
}

/// Native TTL and size-bound eviction over a partition.
pub trait ExpirableStore: Send + Sync {
    /// Run one eviction pass and return how many entries were removed.
    ///
    /// Oldest entries go first until at most `max_entries` remain, then
    /// entries at least `entry_ttl` old are removed. `None` disables a bound.
    fn expire(
        &self,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
        partition: &str,
    ) -> StoreResult<usize>;
}
