//! Persistent Backend
//!
//! Partitioned on-disk store. The root directory holds one subdirectory per
//! partition, named with a generated id; the logical partition name lives in
//! each directory's descriptor file.

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::partition::{read_descriptor, PersistentPartition};
use super::serializer::{BincodeSerializer, Extensions, Persistable, Serializer};
use crate::error::{StoreError, StoreResult};
use crate::storage::{ensure_key, ExpirableStore, PartitionedStore};

/// Partitioned store backed by a directory tree
pub struct PersistentStore<V, S = BincodeSerializer> {
    root: PathBuf,
    serializer: Arc<S>,
    extensions: Arc<Extensions>,
    partitions: DashMap<String, Arc<PersistentPartition<V, S>>>,
    scan_lock: Mutex<()>,
    scanned: AtomicBool,
}

impl<V> PersistentStore<V, BincodeSerializer>
where
    V: Persistable,
{
    /// Store rooted at `root` using the default binary encoding.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self::with_serializer(root, BincodeSerializer)
    }
}

impl<V, S> PersistentStore<V, S>
where
    V: Persistable,
    S: Serializer,
{
    pub fn with_serializer<P: Into<PathBuf>>(root: P, serializer: S) -> Self {
        Self {
            root: root.into(),
            serializer: Arc::new(serializer),
            extensions: Arc::new(Extensions::new()),
            partitions: DashMap::new(),
            scan_lock: Mutex::new(()),
            scanned: AtomicBool::new(false),
        }
    }

    /// Collaborators handed to [`Persistable::after_load`] on every load.
    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = Arc::new(extensions);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and discover existing partitions, once.
    ///
    /// A partition directory whose descriptor cannot be read is logged and
    /// skipped.
    fn ensure_scanned(&self) -> StoreResult<()> {
        if self.scanned.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.scan_lock.lock();
        if self.scanned.load(Ordering::Acquire) {
            return Ok(());
        }

        // Safe against concurrent creators of the same directory
        fs::create_dir_all(&self.root)?;

        let mut found = 0;
        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            let name = match read_descriptor(&dir) {
                Ok(name) => name,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable partition");
                    continue;
                }
            };
            let partition = PersistentPartition::existing(
                name.clone(),
                dir,
                self.serializer.clone(),
                self.extensions.clone(),
            );
            self.partitions.entry(name).or_insert_with(|| Arc::new(partition));
            found += 1;
        }

        info!(root = %self.root.display(), partitions = found, "Opened persistent store");
        self.scanned.store(true, Ordering::Release);
        Ok(())
    }

    fn partition(&self, name: &str) -> StoreResult<Option<Arc<PersistentPartition<V, S>>>> {
        self.ensure_scanned()?;
        Ok(self.partitions.get(name).map(|p| p.value().clone()))
    }

    fn partition_or_create(&self, name: &str) -> StoreResult<Arc<PersistentPartition<V, S>>> {
        self.ensure_scanned()?;
        if let Some(existing) = self.partitions.get(name) {
            return Ok(existing.value().clone());
        }
        // Creation holds the shard lock so one name never gets two directories
        match self.partitions.entry(name.to_string()) {
            MapEntry::Occupied(e) => Ok(e.get().clone()),
            MapEntry::Vacant(e) => {
                let created = PersistentPartition::create(
                    &self.root,
                    name,
                    self.serializer.clone(),
                    self.extensions.clone(),
                )?;
                Ok(e.insert(Arc::new(created)).value().clone())
            }
        }
    }

    /// Partition names with their backing directories.
    pub fn partition_dirs(&self) -> StoreResult<Vec<(String, PathBuf)>> {
        self.ensure_scanned()?;
        Ok(self
            .partitions
            .iter()
            .map(|r| (r.key().clone(), r.value().dir().to_path_buf()))
            .collect())
    }
}

impl<V, S> PartitionedStore<V> for PersistentStore<V, S>
where
    V: Persistable,
    S: Serializer,
{
    fn contains(&self, key: &str, partition: &str) -> StoreResult<bool> {
        ensure_key(key)?;
        match self.partition(partition)? {
            Some(p) => p.contains(key),
            None => Ok(false),
        }
    }

    fn store(&self, key: &str, value: V, partition: &str) -> StoreResult<()> {
        ensure_key(key)?;
        self.partition_or_create(partition)?.store(key, &value)
    }

    fn retrieve(&self, key: &str, partition: &str) -> StoreResult<V> {
        ensure_key(key)?;
        self.partition(partition)?
            .ok_or_else(|| StoreError::missing_key(key))?
            .retrieve(key)
    }

    fn remove(&self, key: &str, partition: &str) -> StoreResult<V> {
        ensure_key(key)?;
        self.partition(partition)?
            .ok_or_else(|| StoreError::missing_key(key))?
            .remove(key)
    }

    fn clear(&self, partition: &str) -> StoreResult<()> {
        match self.partition(partition)? {
            Some(p) => p.clear(),
            None => Ok(()),
        }
    }

    fn all_keys(&self, partition: &str) -> StoreResult<Vec<String>> {
        match self.partition(partition)? {
            Some(p) => p.all_keys(),
            None => Ok(Vec::new()),
        }
    }

    fn all_partitions(&self) -> StoreResult<Vec<String>> {
        self.ensure_scanned()?;
        Ok(self.partitions.iter().map(|r| r.key().clone()).collect())
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn open(&self) -> StoreResult<()> {
        self.ensure_scanned()
    }

    fn open_partition(&self, partition: &str) -> StoreResult<()> {
        self.partition_or_create(partition).map(|_| ())
    }

    fn close_partition(&self, _partition: &str) -> StoreResult<()> {
        // The index stays resident for the life of the process
        Ok(())
    }

    fn dispose_partition(&self, partition: &str) -> StoreResult<()> {
        self.ensure_scanned()?;
        let (_, removed) = self
            .partitions
            .remove(partition)
            .ok_or_else(|| StoreError::missing_partition(partition))?;
        removed.dispose()
    }
}

impl<V, S> ExpirableStore for PersistentStore<V, S>
where
    V: Persistable,
    S: Serializer,
{
    fn expire(
        &self,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
        partition: &str,
    ) -> StoreResult<usize> {
        match self.partition(partition)? {
            Some(p) => p.expire(entry_ttl, max_entries),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::partition::DESCRIPTOR_FILE;
    use crate::persistence::serializer::{JsonSerializer, LoadContext};
    use crate::storage::StampedEntry;
    use serde::{Deserialize, Serialize};
    use std::thread;
    use tempfile::tempdir;

    /// Region handle re-attached from the host on load
    #[derive(Debug, Clone, PartialEq)]
    struct Region(String);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        #[serde(skip)]
        region: Option<String>,
        #[serde(skip)]
        loads: u32,
    }

    impl Persistable for Session {
        fn after_load(&mut self, ctx: &LoadContext<'_>) {
            self.region = ctx
                .extensions
                .get::<Region>()
                .map(|r| format!("{}/{}", r.0, ctx.partition));
            self.loads += 1;
        }
    }

    fn session(user: &str) -> Session {
        Session {
            user: user.to_string(),
            region: None,
            loads: 0,
        }
    }

    fn with_region<V: Persistable>(root: &Path) -> PersistentStore<V> {
        let mut extensions = Extensions::new();
        extensions.insert(Region("eu-west".to_string()));
        PersistentStore::new(root).with_extensions(extensions)
    }

    #[test]
    fn test_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let store: PersistentStore<String> = PersistentStore::new(dir.path());
            store.open().unwrap();
            store.store("k1", "v1".to_string(), "p").unwrap();
            store.store("k2", "v2".to_string(), "p").unwrap();
            store.close_partition("p").unwrap();
        }

        let reopened: PersistentStore<String> = PersistentStore::new(dir.path());
        reopened.open().unwrap();
        assert_eq!(reopened.retrieve("k1", "p").unwrap(), "v1");
        let mut keys = reopened.all_keys("p").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(reopened.all_partitions().unwrap(), vec!["p".to_string()]);
    }

    #[test]
    fn test_dispose_partition_leaves_siblings() {
        let dir = tempdir().unwrap();
        let store: PersistentStore<i64> = PersistentStore::new(dir.path());
        store.store("x", 1, "p1").unwrap();
        store.store("x", 1, "p2").unwrap();

        store.dispose_partition("p1").unwrap();
        assert!(matches!(
            store.retrieve("x", "p1"),
            Err(StoreError::DoesNotExist(_))
        ));
        assert_eq!(store.retrieve("x", "p2").unwrap(), 1);
        assert!(matches!(
            store.dispose_partition("p1"),
            Err(StoreError::DoesNotExist(_))
        ));
    }

    #[test]
    fn test_directories_are_generated() {
        let dir = tempdir().unwrap();
        let store: PersistentStore<String, JsonSerializer> =
            PersistentStore::with_serializer(dir.path(), JsonSerializer);
        store.open_partition("Human Readable / Name").unwrap();

        let dirs = store.partition_dirs().unwrap();
        assert_eq!(dirs.len(), 1);
        let (name, path) = &dirs[0];
        assert_eq!(name, "Human Readable / Name");
        assert!(path.starts_with(dir.path()));
        assert_ne!(path.file_name().unwrap(), "Human Readable / Name");
    }

    #[test]
    fn test_unreadable_partition_is_skipped() {
        let dir = tempdir().unwrap();
        {
            let store: PersistentStore<String> = PersistentStore::new(dir.path());
            store.store("k", "v".to_string(), "good").unwrap();
        }
        // A directory without a descriptor
        fs::create_dir_all(dir.path().join("stray")).unwrap();
        // A directory with an empty descriptor
        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        fs::write(empty.join(DESCRIPTOR_FILE), "").unwrap();

        let store: PersistentStore<String> = PersistentStore::new(dir.path());
        assert_eq!(store.all_partitions().unwrap(), vec!["good".to_string()]);
        assert_eq!(store.retrieve("k", "good").unwrap(), "v");
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("root");
        let store: PersistentStore<String> = PersistentStore::new(&root);
        store.open().unwrap();
        store.open().unwrap();
        assert!(root.is_dir());
        assert!(store.all_partitions().unwrap().is_empty());
    }

    #[test]
    fn test_after_load_runs_on_every_read() {
        let dir = tempdir().unwrap();
        {
            let store: PersistentStore<Session> = with_region(dir.path());
            store.store("s1", session("ada"), "sessions").unwrap();

            let loaded = store.retrieve("s1", "sessions").unwrap();
            assert_eq!(loaded.user, "ada");
            assert_eq!(loaded.region.as_deref(), Some("eu-west/sessions"));
            assert_eq!(loaded.loads, 1);
        }

        // Fresh process over the same directory
        let store: PersistentStore<Session> = with_region(dir.path());
        let loaded = store.retrieve("s1", "sessions").unwrap();
        assert_eq!(loaded.region.as_deref(), Some("eu-west/sessions"));
        assert_eq!(loaded.loads, 1);

        let removed = store.remove("s1", "sessions").unwrap();
        assert_eq!(removed.user, "ada");
        assert_eq!(removed.region.as_deref(), Some("eu-west/sessions"));
        assert_eq!(removed.loads, 1);
    }

    #[test]
    fn test_after_load_reaches_stamped_values() {
        let dir = tempdir().unwrap();
        let store: PersistentStore<StampedEntry<Session>> = with_region(dir.path());
        let entry = StampedEntry {
            key: "s1".to_string(),
            stored_at_ms: 1,
            sequence: 0,
            value: session("grace"),
        };
        store.store("s1", entry, "boxed").unwrap();

        let loaded = store.retrieve("s1", "boxed").unwrap();
        assert_eq!(loaded.key, "s1");
        assert_eq!(loaded.value.user, "grace");
        assert_eq!(loaded.value.region.as_deref(), Some("eu-west/boxed"));
    }

    #[test]
    fn test_concurrent_first_use_scans_once() {
        let dir = tempdir().unwrap();
        {
            let store: PersistentStore<String> = PersistentStore::new(dir.path());
            for i in 0..4 {
                store.store("k", format!("v{}", i), &format!("p{}", i)).unwrap();
            }
        }

        let store: Arc<PersistentStore<String>> = Arc::new(PersistentStore::new(dir.path()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || store.retrieve("k", &format!("p{}", i)).unwrap())
            })
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.join().unwrap(), format!("v{}", i));
        }

        let mut partitions = store.all_partitions().unwrap();
        partitions.sort();
        assert_eq!(partitions, vec!["p0", "p1", "p2", "p3"]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 4);
    }
}
