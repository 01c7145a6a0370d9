//! Monitored Store
//!
//! Adds TTL and max-entries eviction to a store that cannot enforce them
//! itself. Values are boxed with their key and a wall-clock timestamp on the
//! way in and unboxed on the way out.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::contract::{ensure_key, ObjectStore};
use crate::config::StoreSettings;
use crate::error::{StoreError, StoreResult};
use crate::persistence::{LoadContext, Persistable};
use crate::scheduler::{Scheduler, TaskHandle};

/// A value boxed with what the eviction pass needs to order it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedEntry<V> {
    pub key: String,
    /// Milliseconds since the Unix epoch at store time
    pub stored_at_ms: i64,
    /// Breaks ties between entries stored in the same millisecond
    pub sequence: u64,
    pub value: V,
}

impl<V: Persistable> Persistable for StampedEntry<V> {
    fn after_load(&mut self, ctx: &LoadContext<'_>) {
        self.value.after_load(ctx);
    }
}

/// Store wrapper that evicts by age and count on a schedule
pub struct MonitoredStore<V> {
    inner: Arc<dyn ObjectStore<StampedEntry<V>>>,
    max_entries: Option<usize>,
    entry_ttl: Option<Duration>,
    expiration_interval: Duration,
    sequence: AtomicU64,
    task: Mutex<Option<TaskHandle>>,
}

impl<V> MonitoredStore<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn ObjectStore<StampedEntry<V>>>, settings: &StoreSettings) -> Self {
        Self {
            inner,
            max_entries: settings.max_entries,
            entry_ttl: settings.entry_ttl,
            expiration_interval: settings.expiration_interval,
            sequence: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Wrapper that boxes values but never evicts.
    pub fn unbounded(inner: Arc<dyn ObjectStore<StampedEntry<V>>>) -> Self {
        Self::new(inner, &StoreSettings::default())
    }

    pub fn is_bounded(&self) -> bool {
        self.max_entries.is_some() || self.entry_ttl.is_some()
    }

    /// Register the periodic eviction pass on `scheduler`.
    ///
    /// A no-op for an unbounded wrapper or one already started.
    pub fn start(self: &Arc<Self>, scheduler: &Scheduler, label: &str) -> StoreResult<()> {
        if !self.is_bounded() {
            return Ok(());
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }
        // Weak so a dropped store ends its own task
        let store = Arc::downgrade(self);
        let handle = scheduler.schedule_eviction(label, self.expiration_interval, move || {
            match store.upgrade() {
                Some(store) => store.expire(),
                None => Ok(0),
            }
        })?;
        *task = Some(handle);
        Ok(())
    }

    /// Cancel the eviction task. An in-flight pass is allowed to finish.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stamp(&self, key: &str, value: V) -> StampedEntry<V> {
        StampedEntry {
            key: key.to_string(),
            stored_at_ms: Utc::now().timestamp_millis(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            value,
        }
    }

    fn remove_quietly(&self, key: &str) -> StoreResult<bool> {
        match self.inner.remove(key) {
            Ok(_) => Ok(true),
            Err(StoreError::DoesNotExist(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run one eviction pass. Returns the number of entries removed.
    ///
    /// A single scan removes entries past their TTL and keeps the oldest
    /// survivors in a heap bounded by the initial excess; those are then
    /// removed oldest-first until the store is back within `max_entries`.
    pub fn expire(&self) -> StoreResult<usize> {
        let keys = self.inner.all_keys()?;
        let mut excess = match self.max_entries {
            Some(max) => keys.len() as i64 - max as i64,
            None => 0,
        };
        let capacity = excess.max(0) as usize;
        let ttl_ms = self.entry_ttl.map(|ttl| ttl.as_millis() as i64);
        let now = Utc::now().timestamp_millis();

        let mut removed = 0;
        // Max-heap: the youngest candidate sits on top and is dropped first
        let mut oldest: BinaryHeap<(i64, u64, String)> = BinaryHeap::with_capacity(capacity + 1);

        for key in keys {
            let entry = match self.inner.retrieve(&key) {
                Ok(entry) => entry,
                // Removed by a caller since the listing
                Err(StoreError::DoesNotExist(_)) => continue,
                Err(e) => return Err(e),
            };

            if ttl_ms.is_some_and(|ttl| now - entry.stored_at_ms >= ttl) {
                if self.remove_quietly(&key)? {
                    removed += 1;
                    excess -= 1;
                }
            } else if excess > 0 {
                oldest.push((entry.stored_at_ms, entry.sequence, key));
                if oldest.len() > capacity {
                    oldest.pop();
                }
            }
        }

        for (_, _, key) in oldest.into_sorted_vec() {
            if excess <= 0 {
                break;
            }
            if self.remove_quietly(&key)? {
                removed += 1;
                excess -= 1;
            }
        }

        if removed > 0 {
            debug!(removed = removed, "Evicted entries");
        }
        Ok(removed)
    }
}

impl<V> ObjectStore<V> for MonitoredStore<V>
where
    V: Send + Sync + 'static,
{
    fn contains(&self, key: &str) -> StoreResult<bool> {
        self.inner.contains(key)
    }

    fn store(&self, key: &str, value: V) -> StoreResult<()> {
        ensure_key(key)?;
        let stamped = self.stamp(key, value);
        self.inner.store(key, stamped)
    }

    fn retrieve(&self, key: &str) -> StoreResult<V> {
        self.inner.retrieve(key).map(|entry| entry.value)
    }

    fn remove(&self, key: &str) -> StoreResult<V> {
        self.inner.remove(key).map(|entry| entry.value)
    }

    fn clear(&self) -> StoreResult<()> {
        self.inner.clear()
    }

    fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.inner.all_keys()
    }

    fn is_persistent(&self) -> bool {
        self.inner.is_persistent()
    }

    fn open(&self) -> StoreResult<()> {
        self.inner.open()
    }

    fn close(&self) -> StoreResult<()> {
        self.stop();
        self.inner.close()
    }
}

impl<V> Drop for MonitoredStore<V> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel();
        }
    }
}
