//! Key-value storage backends.
//!
//! The local store sees storage the way a browser sees `localStorage`: a flat
//! map of string keys to string values with synchronous reads and writes.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Synchronous string key-value storage.
pub trait StorageBackend: Send + Sync {
    /// Read the value stored under `key`.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// All keys currently stored.
    fn keys(&self) -> Vec<String>;
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }
}

/// File-backed storage: the whole key-value map lives in one JSON file.
///
/// Every mutation rewrites the file through a temporary sibling and a
/// rename, so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    items: RwLock<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file also starts
    /// empty; it is only overwritten by the next successful write.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let items = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "corrupt storage file, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            items: RwLock::new(items),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(items)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.items.write();
        items.insert(key.to_string(), value.to_string());
        self.persist(&items)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self.items.write();
        if items.remove(key).is_some() {
            self.persist(&items)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_basic() {
        let backend = MemoryBackend::new();
        assert!(backend.is_empty());

        backend.set_item("k", "v").unwrap();
        assert_eq!(backend.get_item("k").as_deref(), Some("v"));
        assert_eq!(backend.keys(), vec!["k".to_string()]);

        backend.remove_item("k").unwrap();
        backend.remove_item("missing").unwrap();
        assert!(backend.get_item("k").is_none());
    }

    #[test]
    fn test_file_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let backend = FileBackend::open(&path);
        backend.set_item("lifeops:a", "1").unwrap();
        backend.set_item("lifeops:b", "2").unwrap();
        backend.remove_item("lifeops:a").unwrap();

        let reopened = FileBackend::open(&path);
        assert_eq!(reopened.get_item("lifeops:b").as_deref(), Some("2"));
        assert!(reopened.get_item("lifeops:a").is_none());
    }

    #[test]
    fn test_file_backend_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();

        let backend = FileBackend::open(&path);
        assert!(backend.keys().is_empty());

        backend.set_item("k", "v").unwrap();
        assert_eq!(FileBackend::open(&path).get_item("k").as_deref(), Some("v"));
    }
}
