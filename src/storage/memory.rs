//! In-Memory Backend
//!
//! Concurrent key-value partitions with an insertion-ordered index for
//! oldest-first eviction. Lock-free on the value path; the ordered index
//! sits behind its own short-lived lock.

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::contract::{ensure_key, ExpirableStore, ObjectStore, PartitionedStore};
use crate::error::{StoreError, StoreResult};

/// Eviction ordering key. Never handed to callers.
///
/// Nanoseconds since the owning clock's origin, with a sequence number to
/// break ties when the clock does not advance between inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct InsertionMarker {
    nanos: u64,
    seq: u64,
}

/// Monotonic source of insertion markers
#[derive(Debug)]
struct InsertionClock {
    origin: Instant,
    seq: AtomicU64,
}

impl InsertionClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            seq: AtomicU64::new(0),
        }
    }

    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn next(&self) -> InsertionMarker {
        InsertionMarker {
            nanos: self.now_nanos(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn age(&self, marker: &InsertionMarker) -> Duration {
        Duration::from_nanos(self.now_nanos().saturating_sub(marker.nanos))
    }
}

/// Unpartitioned in-memory store with native eviction
///
/// Values live in a `DashMap`. A `BTreeMap` keyed by insertion marker answers
/// "what is oldest" in O(log n), and a reverse `marker` map lets removal by
/// key drop the matching index entry without scanning.
///
/// Eviction is not atomic with concurrent writers: the store may briefly hold
/// more than `max_entries` between passes.
#[derive(Debug)]
pub struct MemoryObjectStore<V> {
    values: DashMap<String, V>,
    markers: DashMap<String, InsertionMarker>,
    order: Mutex<BTreeMap<InsertionMarker, String>>,
    clock: InsertionClock,
}

impl<V> Default for MemoryObjectStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemoryObjectStore<V> {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            markers: DashMap::new(),
            order: Mutex::new(BTreeMap::new()),
            clock: InsertionClock::new(),
        }
    }

    /// Number of entries (may transiently exceed the configured bound)
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop the entry behind `marker` if it is still the live one for `key`.
    fn evict(&self, marker: InsertionMarker, key: &str) -> bool {
        if self.markers.remove_if(key, |_, m| *m == marker).is_some() {
            return self.values.remove(key).is_some();
        }
        false
    }

    /// Run one eviction pass. Returns the number of entries removed.
    pub fn expire(&self, entry_ttl: Option<Duration>, max_entries: Option<usize>) -> usize {
        let mut removed = 0;

        if let Some(max) = max_entries {
            while self.values.len() > max {
                let oldest = self.order.lock().pop_first();
                match oldest {
                    Some((marker, key)) => {
                        if self.evict(marker, &key) {
                            removed += 1;
                        }
                    }
                    None => break,
                }
            }
        }

        if let Some(ttl) = entry_ttl {
            loop {
                let expired = {
                    let mut order = self.order.lock();
                    let oldest_expired = order
                        .first_key_value()
                        .is_some_and(|(marker, _)| self.clock.age(marker) >= ttl);
                    if oldest_expired {
                        order.pop_first()
                    } else {
                        None
                    }
                };
                match expired {
                    Some((marker, key)) => {
                        if self.evict(marker, &key) {
                            removed += 1;
                        }
                    }
                    // Everything left is younger than the TTL
                    None => break,
                }
            }
        }

        if removed > 0 {
            debug!(removed = removed, remaining = self.values.len(), "Evicted entries");
        }
        removed
    }
}

impl<V> ObjectStore<V> for MemoryObjectStore<V>
where
    V: Clone + Send + Sync,
{
    fn contains(&self, key: &str) -> StoreResult<bool> {
        ensure_key(key)?;
        Ok(self.values.contains_key(key))
    }

    fn store(&self, key: &str, value: V) -> StoreResult<()> {
        ensure_key(key)?;
        match self.values.entry(key.to_string()) {
            MapEntry::Occupied(_) => return Err(StoreError::AlreadyExists(key.to_string())),
            MapEntry::Vacant(slot) => {
                slot.insert(value);
            }
        }

        let marker = self.clock.next();
        let stale = self.markers.insert(key.to_string(), marker);
        let mut order = self.order.lock();
        if let Some(stale) = stale {
            order.remove(&stale);
        }
        order.insert(marker, key.to_string());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> StoreResult<V> {
        ensure_key(key)?;
        self.values
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| StoreError::missing_key(key))
    }

    fn remove(&self, key: &str) -> StoreResult<V> {
        ensure_key(key)?;
        let (_, value) = self
            .values
            .remove(key)
            .ok_or_else(|| StoreError::missing_key(key))?;
        if let Some((_, marker)) = self.markers.remove(key) {
            self.order.lock().remove(&marker);
        }
        Ok(value)
    }

    fn clear(&self) -> StoreResult<()> {
        self.values.clear();
        self.markers.clear();
        self.order.lock().clear();
        Ok(())
    }

    fn all_keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.values.iter().map(|r| r.key().clone()).collect())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// Partitioned in-memory backend
///
/// Each partition is an independent [`MemoryObjectStore`]. Partitions are
/// created by writes and by `open_partition`, never by reads.
#[derive(Debug)]
pub struct InMemoryStore<V> {
    partitions: DashMap<String, Arc<MemoryObjectStore<V>>>,
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }

    fn partition(&self, name: &str) -> Option<Arc<MemoryObjectStore<V>>> {
        self.partitions.get(name).map(|p| p.value().clone())
    }

    fn partition_or_create(&self, name: &str) -> Arc<MemoryObjectStore<V>> {
        self.partitions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryObjectStore::new()))
            .value()
            .clone()
    }
}

impl<V> PartitionedStore<V> for InMemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn contains(&self, key: &str, partition: &str) -> StoreResult<bool> {
        ensure_key(key)?;
        match self.partition(partition) {
            Some(p) => p.contains(key),
            None => Ok(false),
        }
    }

    fn store(&self, key: &str, value: V, partition: &str) -> StoreResult<()> {
        ensure_key(key)?;
        self.partition_or_create(partition).store(key, value)
    }

    fn retrieve(&self, key: &str, partition: &str) -> StoreResult<V> {
        ensure_key(key)?;
        self.partition(partition)
            .ok_or_else(|| StoreError::missing_key(key))?
            .retrieve(key)
    }

    fn remove(&self, key: &str, partition: &str) -> StoreResult<V> {
        ensure_key(key)?;
        self.partition(partition)
            .ok_or_else(|| StoreError::missing_key(key))?
            .remove(key)
    }

    fn clear(&self, partition: &str) -> StoreResult<()> {
        match self.partition(partition) {
            Some(p) => p.clear(),
            None => Ok(()),
        }
    }

    fn all_keys(&self, partition: &str) -> StoreResult<Vec<String>> {
        match self.partition(partition) {
            Some(p) => p.all_keys(),
            None => Ok(Vec::new()),
        }
    }

    fn all_partitions(&self) -> StoreResult<Vec<String>> {
        Ok(self.partitions.iter().map(|r| r.key().clone()).collect())
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn open_partition(&self, partition: &str) -> StoreResult<()> {
        self.partition_or_create(partition);
        Ok(())
    }

    fn close_partition(&self, _partition: &str) -> StoreResult<()> {
        Ok(())
    }

    fn dispose_partition(&self, partition: &str) -> StoreResult<()> {
        let (_, removed) = self
            .partitions
            .remove(partition)
            .ok_or_else(|| StoreError::missing_partition(partition))?;
        removed.clear()
    }
}

impl<V> ExpirableStore for InMemoryStore<V>
where
    V: Send + Sync,
{
    fn expire(
        &self,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
        partition: &str,
    ) -> StoreResult<usize> {
        Ok(self
            .partition(partition)
            .map(|p| p.expire(entry_ttl, max_entries))
            .unwrap_or(0))
    }
}
