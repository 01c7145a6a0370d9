//! Namespaced Partitioning
//!
//! Partitions for a backend with no partition concept: every key is wrapped
//! as `(partition, key)` before it reaches the backend. Listing a partition
//! scans the backend's whole key set, so this path suits small or legacy
//! backends only.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::contract::{ensure_key, ObjectStore, PartitionedStore};
use crate::error::{StoreError, StoreResult};

/// Encode `(partition, key)` as `<partition byte length>:<partition>:<key>`.
pub fn qualify(partition: &str, key: &str) -> String {
    format!("{}:{}:{}", partition.len(), partition, key)
}

/// Split a qualified key back into `(partition, key)`.
pub fn unqualify(qualified: &str) -> Option<(&str, &str)> {
    let (len, rest) = qualified.split_once(':')?;
    let len: usize = len.parse().ok()?;
    let partition = rest.get(..len)?;
    let key = rest.get(len..)?.strip_prefix(':')?;
    Some((partition, key))
}

/// Partitioned facade over a plain store
pub struct NamespacedStore<V> {
    inner: Arc<dyn ObjectStore<V>>,
}

impl<V> NamespacedStore<V> {
    pub fn new(inner: Arc<dyn ObjectStore<V>>) -> Self {
        Self { inner }
    }

    fn keys_in(&self, partition: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .inner
            .all_keys()?
            .iter()
            .filter_map(|q| unqualify(q))
            .filter(|(p, _)| *p == partition)
            .map(|(_, key)| key.to_string())
            .collect())
    }
}

impl<V> PartitionedStore<V> for NamespacedStore<V>
where
    V: Send + Sync,
{
    fn contains(&self, key: &str, partition: &str) -> StoreResult<bool> {
        ensure_key(key)?;
        self.inner.contains(&qualify(partition, key))
    }

    fn store(&self, key: &str, value: V, partition: &str) -> StoreResult<()> {
        ensure_key(key)?;
        self.inner
            .store(&qualify(partition, key), value)
            .map_err(|e| match e {
                StoreError::AlreadyExists(_) => StoreError::AlreadyExists(key.to_string()),
                other => other,
            })
    }

    fn retrieve(&self, key: &str, partition: &str) -> StoreResult<V> {
        ensure_key(key)?;
        self.inner
            .retrieve(&qualify(partition, key))
            .map_err(|e| match e {
                StoreError::DoesNotExist(_) => StoreError::missing_key(key),
                other => other,
            })
    }

    fn remove(&self, key: &str, partition: &str) -> StoreResult<V> {
        ensure_key(key)?;
        self.inner
            .remove(&qualify(partition, key))
            .map_err(|e| match e {
                StoreError::DoesNotExist(_) => StoreError::missing_key(key),
                other => other,
            })
    }

    fn clear(&self, partition: &str) -> StoreResult<()> {
        for key in self.keys_in(partition)? {
            match self.inner.remove(&qualify(partition, &key)) {
                Ok(_) | Err(StoreError::DoesNotExist(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn all_keys(&self, partition: &str) -> StoreResult<Vec<String>> {
        self.keys_in(partition)
    }

    fn all_partitions(&self) -> StoreResult<Vec<String>> {
        let names: BTreeSet<String> = self
            .inner
            .all_keys()?
            .iter()
            .filter_map(|q| unqualify(q))
            .map(|(p, _)| p.to_string())
            .collect();
        Ok(names.into_iter().collect())
    }

    fn is_persistent(&self) -> bool {
        self.inner.is_persistent()
    }

    fn open(&self) -> StoreResult<()> {
        self.inner.open()
    }

    fn open_partition(&self, _partition: &str) -> StoreResult<()> {
        self.inner.open()
    }

    fn close_partition(&self, _partition: &str) -> StoreResult<()> {
        // The backend is shared with sibling partitions
        Ok(())
    }

    fn dispose_partition(&self, partition: &str) -> StoreResult<()> {
        self.clear(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;

    #[test]
    fn test_qualify_round_trip_with_separators() {
        let q = qualify("a:b", "c:d");
        assert_eq!(unqualify(&q), Some(("a:b", "c:d")));
        assert_eq!(unqualify("plain-key"), None);
        assert_eq!(unqualify("9:short:x"), None);
    }

    #[test]
    fn test_partitions_are_disjoint() {
        let inner: Arc<dyn ObjectStore<u32>> = Arc::new(MemoryObjectStore::new());
        let store = NamespacedStore::new(inner.clone());

        store.store("x", 1, "p1").unwrap();
        store.store("x", 2, "p2").unwrap();
        store.store("y", 3, "p2").unwrap();

        assert_eq!(store.retrieve("x", "p1").unwrap(), 1);
        assert_eq!(store.retrieve("x", "p2").unwrap(), 2);
        assert_eq!(store.all_keys("p1").unwrap(), vec!["x".to_string()]);
        assert_eq!(
            store.all_partitions().unwrap(),
            vec!["p1".to_string(), "p2".to_string()]
        );
        assert_eq!(inner.all_keys().unwrap().len(), 3);

        // Errors name the caller's key, not the qualified one
        match store.retrieve("z", "p1") {
            Err(StoreError::DoesNotExist(msg)) => assert_eq!(msg, "key 'z'"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dispose_partition_leaves_siblings() {
        let inner: Arc<dyn ObjectStore<u32>> = Arc::new(MemoryObjectStore::new());
        let store = NamespacedStore::new(inner);
        store.store("x", 1, "p1").unwrap();
        store.store("x", 1, "p2").unwrap();

        store.dispose_partition("p1").unwrap();
        assert!(matches!(
            store.retrieve("x", "p1"),
            Err(StoreError::DoesNotExist(_))
        ));
        assert_eq!(store.retrieve("x", "p2").unwrap(), 1);
        assert!(matches!(
            store.store("x", 9, "p2"),
            Err(StoreError::AlreadyExists(_))
        ));
    }
}
