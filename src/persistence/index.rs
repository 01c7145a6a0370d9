//! Key Index
//!
//! Bidirectional map between logical keys and entry filenames. Two plain
//! hash maps kept in sync; callers hold the partition lock.

use hashbrown::HashMap;

#[derive(Debug, Default)]
pub struct KeyIndex {
    by_key: HashMap<String, String>,
    by_file: HashMap<String, String>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as stored in `file`, replacing stale links on either side.
    pub fn insert(&mut self, key: String, file: String) {
        if let Some(old_file) = self.by_key.insert(key.clone(), file.clone()) {
            if old_file != file {
                self.by_file.remove(&old_file);
            }
        }
        if let Some(old_key) = self.by_file.insert(file, key.clone()) {
            if old_key != key {
                self.by_key.remove(&old_key);
            }
        }
    }

    pub fn file_for(&self, key: &str) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    pub fn key_for(&self, file: &str) -> Option<&str> {
        self.by_file.get(file).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Unlink by key, returning the file it pointed to.
    pub fn remove_key(&mut self, key: &str) -> Option<String> {
        let file = self.by_key.remove(key)?;
        self.by_file.remove(&file);
        Some(file)
    }

    /// Unlink by file, returning the key it held.
    pub fn remove_file(&mut self, file: &str) -> Option<String> {
        let key = self.by_file.remove(file)?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.by_key.keys().cloned().collect()
    }

    pub fn files(&self) -> Vec<String> {
        self.by_file.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_file.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_both_ways() {
        let mut index = KeyIndex::new();
        index.insert("order-1".to_string(), "a.obj".to_string());
        index.insert("order-2".to_string(), "b.obj".to_string());

        assert_eq!(index.file_for("order-1"), Some("a.obj"));
        assert_eq!(index.key_for("b.obj"), Some("order-2"));
        assert_eq!(index.len(), 2);

        assert_eq!(index.remove_file("a.obj").as_deref(), Some("order-1"));
        assert!(!index.contains_key("order-1"));

        assert_eq!(index.remove_key("order-2").as_deref(), Some("b.obj"));
        assert!(index.key_for("b.obj").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_relink_key_drops_old_file() {
        let mut index = KeyIndex::new();
        index.insert("k".to_string(), "old.obj".to_string());
        index.insert("k".to_string(), "new.obj".to_string());

        assert_eq!(index.file_for("k"), Some("new.obj"));
        assert!(index.key_for("old.obj").is_none());
        assert_eq!(index.files(), vec!["new.obj".to_string()]);
    }
}
