//! Persistent Partition
//!
//! One partition is one directory: a descriptor file holding the partition's
//! logical name, plus one `<id>.obj` file per entry containing the serialized
//! (key, value) pair. The key index is loaded lazily from disk on first use
//! and every read, write and eviction pass runs under the partition lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::index::KeyIndex;
use super::serializer::{Extensions, LoadContext, Persistable, Serializer};
use crate::error::{StoreError, StoreResult};

/// Fixed name of the file recording a partition's logical name
pub const DESCRIPTOR_FILE: &str = "partition-descriptor";

/// Extension of entry files
pub const ENTRY_EXTENSION: &str = "obj";

/// Suffix of an entry file still being written
const STAGING_EXTENSION: &str = "tmp";

#[derive(Serialize)]
struct EntryRecordRef<'a, V> {
    key: &'a str,
    value: &'a V,
}

#[derive(Deserialize)]
struct EntryRecord<V> {
    key: String,
    value: V,
}

/// A single on-disk partition
pub struct PersistentPartition<V, S> {
    name: String,
    dir: PathBuf,
    serializer: Arc<S>,
    extensions: Arc<Extensions>,
    index: Mutex<Option<KeyIndex>>,
    _values: PhantomData<fn() -> V>,
}

impl<V, S> std::fmt::Debug for PersistentPartition<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentPartition")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish()
    }
}

/// Read the logical partition name recorded in `dir`.
pub fn read_descriptor(dir: &Path) -> StoreResult<String> {
    let name = fs::read_to_string(dir.join(DESCRIPTOR_FILE))?;
    if name.is_empty() {
        return Err(StoreError::StoreUnavailable(format!(
            "empty partition descriptor in {}",
            dir.display()
        )));
    }
    Ok(name)
}

/// Entry files in `dir`, skipping the descriptor and anything else.
pub fn entry_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == ENTRY_EXTENSION).unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(files)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

impl<V, S> PersistentPartition<V, S>
where
    V: Persistable,
    S: Serializer,
{
    /// Create a fresh partition directory under `root`.
    pub(crate) fn create(
        root: &Path,
        name: &str,
        serializer: Arc<S>,
        extensions: Arc<Extensions>,
    ) -> StoreResult<Self> {
        let dir = root.join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(DESCRIPTOR_FILE), name)?;
        debug!(partition = name, dir = %dir.display(), "Created partition");

        let mut partition = Self::existing(name.to_string(), dir, serializer, extensions);
        partition.index = Mutex::new(Some(KeyIndex::new()));
        Ok(partition)
    }

    /// Attach to a partition directory found on disk. The index loads on first use.
    pub(crate) fn existing(
        name: String,
        dir: PathBuf,
        serializer: Arc<S>,
        extensions: Arc<Extensions>,
    ) -> Self {
        Self {
            name,
            dir,
            serializer,
            extensions,
            index: Mutex::new(None),
            _values: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn with_index<R>(&self, f: impl FnOnce(&mut KeyIndex) -> StoreResult<R>) -> StoreResult<R> {
        let mut guard = self.index.lock();
        if guard.is_none() {
            *guard = Some(self.load_index()?);
        }
        let index = guard.get_or_insert_with(KeyIndex::new);
        f(index)
    }

    fn load_index(&self) -> StoreResult<KeyIndex> {
        let mut index = KeyIndex::new();
        for path in entry_files(&self.dir)? {
            let Some(file) = file_name(&path) else {
                continue;
            };
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match self.serializer.deserialize::<EntryRecord<V>>(&bytes) {
                Ok(record) => index.insert(record.key, file),
                Err(e) => {
                    warn!(partition = %self.name, file = %file, error = %e, "Skipping unreadable entry file");
                }
            }
        }
        debug!(partition = %self.name, entries = index.len(), "Loaded partition index");
        Ok(index)
    }

    fn read_entry(&self, file: &str) -> StoreResult<V> {
        let bytes = match fs::read(self.dir.join(file)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::StoreUnavailable(format!(
                    "entry file {} of partition '{}' is missing",
                    file, self.name
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let record: EntryRecord<V> = self.serializer.deserialize(&bytes)?;
        let mut value = record.value;
        value.after_load(&LoadContext {
            partition: &self.name,
            extensions: &self.extensions,
        });
        Ok(value)
    }

    fn write_entry(&self, file: &str, key: &str, value: &V) -> StoreResult<()> {
        let bytes = self.serializer.serialize(&EntryRecordRef { key, value })?;
        // Staged under a name entry listing ignores, then moved into place
        let staged = self.dir.join(format!("{}.{}", file, STAGING_EXTENSION));
        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged)
            .and_then(|mut out| {
                out.write_all(&bytes)?;
                out.flush()
            })
            .and_then(|()| fs::rename(&staged, self.dir.join(file)));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&staged) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(file = %staged.display(), error = %cleanup, "Failed to remove staged entry");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn delete_entry(&self, file: &str) -> StoreResult<()> {
        match fs::remove_file(self.dir.join(file)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, key: &str) -> StoreResult<bool> {
        self.with_index(|index| Ok(index.contains_key(key)))
    }

    pub fn store(&self, key: &str, value: &V) -> StoreResult<()> {
        self.with_index(|index| {
            if index.contains_key(key) {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            // Time-ordered ids keep same-mtime entries in insertion order
            let file = format!("{}.{}", Uuid::now_v7().simple(), ENTRY_EXTENSION);
            self.write_entry(&file, key, value)?;
            index.insert(key.to_string(), file);
            Ok(())
        })
    }

    pub fn retrieve(&self, key: &str) -> StoreResult<V> {
        self.with_index(|index| {
            let file = index
                .file_for(key)
                .ok_or_else(|| StoreError::missing_key(key))?;
            self.read_entry(file)
        })
    }

    pub fn remove(&self, key: &str) -> StoreResult<V> {
        self.with_index(|index| {
            let file = index
                .file_for(key)
                .ok_or_else(|| StoreError::missing_key(key))?
                .to_string();
            let value = self.read_entry(&file)?;
            self.delete_entry(&file)?;
            index.remove_key(key);
            Ok(value)
        })
    }

    pub fn clear(&self) -> StoreResult<()> {
        self.with_index(|index| {
            for path in entry_files(&self.dir)? {
                if let Some(file) = file_name(&path) {
                    self.delete_entry(&file)?;
                    index.remove_file(&file);
                }
            }
            index.clear();
            Ok(())
        })
    }

    pub fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.with_index(|index| Ok(index.keys()))
    }

    pub fn len(&self) -> StoreResult<usize> {
        self.with_index(|index| Ok(index.len()))
    }

    /// Evict oldest-first by file modification time, filename breaking ties.
    pub fn expire(&self, entry_ttl: Option<Duration>, max_entries: Option<usize>) -> StoreResult<usize> {
        self.with_index(|index| {
            let mut files = Vec::new();
            for path in entry_files(&self.dir)? {
                let modified = fs::metadata(&path)?.modified()?;
                if let Some(file) = file_name(&path) {
                    files.push((modified, file));
                }
            }
            files.sort();

            let now = SystemTime::now();
            let mut remaining = files.len();
            let mut removed = 0;
            for (modified, file) in files {
                let over_limit = max_entries.is_some_and(|max| remaining > max);
                let expired = entry_ttl
                    .is_some_and(|ttl| now.duration_since(modified).unwrap_or_default() >= ttl);
                if !over_limit && !expired {
                    break;
                }
                self.delete_entry(&file)?;
                index.remove_file(&file);
                remaining -= 1;
                removed += 1;
            }

            if removed > 0 {
                debug!(partition = %self.name, removed = removed, remaining = remaining, "Evicted entries");
            }
            Ok(removed)
        })
    }

    /// Delete the partition directory and everything in it.
    pub fn dispose(&self) -> StoreResult<()> {
        let mut guard = self.index.lock();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *guard = Some(KeyIndex::new());
        debug!(partition = %self.name, "Disposed partition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::serializer::{BincodeSerializer, JsonSerializer};
    use std::thread;
    use tempfile::tempdir;

    fn partition<S: Serializer>(root: &Path, serializer: S) -> PersistentPartition<String, S> {
        PersistentPartition::create(root, "orders", Arc::new(serializer), Arc::default()).unwrap()
    }

    #[test]
    fn test_store_retrieve_remove() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), BincodeSerializer);

        p.store("k1", &"v1".to_string()).unwrap();
        assert!(p.contains("k1").unwrap());
        assert_eq!(p.retrieve("k1").unwrap(), "v1");
        assert!(matches!(
            p.store("k1", &"v2".to_string()),
            Err(StoreError::AlreadyExists(_))
        ));

        assert_eq!(p.remove("k1").unwrap(), "v1");
        assert!(!p.contains("k1").unwrap());
        assert!(matches!(p.remove("k1"), Err(StoreError::DoesNotExist(_))));
        assert!(entry_files(p.dir()).unwrap().is_empty());
    }

    #[test]
    fn test_layout_on_disk() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), JsonSerializer);
        p.store("a/b:c", &"slash".to_string()).unwrap();

        assert_eq!(read_descriptor(p.dir()).unwrap(), "orders");
        let files = entry_files(p.dir()).unwrap();
        assert_eq!(files.len(), 1);
        // Filename is generated, never derived from the key
        let name = file_name(&files[0]).unwrap();
        assert!(name.ends_with(".obj"));
        assert!(!name.contains("a/b"));
        let raw = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(raw, r#"{"key":"a/b:c","value":"slash"}"#);
    }

    #[test]
    fn test_index_rebuilt_from_disk() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), BincodeSerializer);
        p.store("k1", &"v1".to_string()).unwrap();
        p.store("k2", &"v2".to_string()).unwrap();

        let reopened: PersistentPartition<String, _> = PersistentPartition::existing(
            "orders".to_string(),
            p.dir().to_path_buf(),
            Arc::new(BincodeSerializer),
            Arc::default(),
        );
        let mut keys = reopened.all_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(reopened.retrieve("k2").unwrap(), "v2");
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), BincodeSerializer);
        p.store("k1", &"v1".to_string()).unwrap();

        for path in entry_files(p.dir()).unwrap() {
            fs::remove_file(path).unwrap();
        }
        assert!(matches!(
            p.retrieve("k1"),
            Err(StoreError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_expire_max_entries() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), BincodeSerializer);
        for key in ["a", "b", "c", "d"] {
            p.store(key, &key.to_string()).unwrap();
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(p.expire(None, Some(2)).unwrap(), 2);
        let mut keys = p.all_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["c".to_string(), "d".to_string()]);
        assert_eq!(entry_files(p.dir()).unwrap().len(), 2);
    }

    #[test]
    fn test_expire_ttl() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), BincodeSerializer);
        p.store("old", &"1".to_string()).unwrap();
        thread::sleep(Duration::from_millis(400));
        p.store("young", &"2".to_string()).unwrap();

        assert_eq!(p.expire(Some(Duration::from_millis(300)), None).unwrap(), 1);
        assert!(!p.contains("old").unwrap());
        assert!(p.contains("young").unwrap());
    }

    #[test]
    fn test_dispose_removes_directory() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), BincodeSerializer);
        p.store("k", &"v".to_string()).unwrap();

        p.dispose().unwrap();
        assert!(!p.dir().exists());
        assert!(!p.contains("k").unwrap());
    }

    #[test]
    fn test_unreadable_entry_is_skipped() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), BincodeSerializer);
        p.store("good", &"v".to_string()).unwrap();
        // Truncated entry left behind by a crash
        fs::write(p.dir().join("0000.obj"), [0u8]).unwrap();

        let reopened: PersistentPartition<String, _> = PersistentPartition::existing(
            "orders".to_string(),
            p.dir().to_path_buf(),
            Arc::new(BincodeSerializer),
            Arc::default(),
        );
        assert_eq!(reopened.retrieve("good").unwrap(), "v");
        reopened.store("new", &"w".to_string()).unwrap();
        let mut keys = reopened.all_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["good".to_string(), "new".to_string()]);

        // Clearing removes the unreadable file too
        reopened.clear().unwrap();
        assert!(entry_files(reopened.dir()).unwrap().is_empty());
        assert!(reopened.all_keys().unwrap().is_empty());
    }

    #[test]
    fn test_store_leaves_no_staged_files() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path(), JsonSerializer);
        p.store("a", &"1".to_string()).unwrap();
        p.store("b", &"2".to_string()).unwrap();

        let names: Vec<String> = fs::read_dir(p.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n == DESCRIPTOR_FILE || n.ends_with(".obj")));
    }
}
