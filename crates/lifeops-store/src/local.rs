//! Local store adapter: one JSON document under one namespaced key.

use crate::backend::StorageBackend;
use crate::document::{deep_merge, Document};
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix shared by every key this application writes.
pub const APP_PREFIX: &str = "lifeops:";

/// Key holding the application state document.
pub const APP_DATA_KEY: &str = "lifeops:appData:v1";

/// Synchronous access to the application state document.
///
/// Reads never fail: a missing or corrupt value loads as an empty document.
/// Writes go through [`LocalStore::save`], which deep-merges the patch into
/// the stored document so sections written by unrelated code survive.
pub struct LocalStore<B: StorageBackend> {
    backend: Arc<B>,
    key: String,
    write_lock: Mutex<()>,
}

impl<B: StorageBackend> LocalStore<B> {
    /// Create a store over `backend` using [`APP_DATA_KEY`].
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_key(backend, APP_DATA_KEY)
    }

    /// Create a store over `backend` using a custom key.
    pub fn with_key(backend: Arc<B>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The underlying backend, shared with history and backup helpers.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Load the stored document, or `{}` if absent or unreadable.
    pub fn load(&self) -> Document {
        let Some(raw) = self.backend.get_item(&self.key) else {
            return Document::new();
        };

        match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(key = %self.key, %err, "stored document is corrupt, loading empty");
                Document::new()
            }
        }
    }

    /// Deep-merge `patch` into the stored document and persist the result.
    ///
    /// Returns the merged document.
    pub fn save(&self, patch: Document) -> Result<Document> {
        let _guard = self.write_lock.lock();
        let mut current = self.load();
        deep_merge(&mut current, patch);
        self.backend
            .set_item(&self.key, &serde_json::to_string(&current)?)?;
        debug!(key = %self.key, sections = current.len(), "saved local document");
        Ok(current)
    }

    /// Overwrite the stored document wholesale.
    pub fn replace(&self, document: &Document) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.backend
            .set_item(&self.key, &serde_json::to_string(document)?)
    }

    /// Overwrite the given top-level sections, keeping all others.
    ///
    /// Used when applying a remote document: each section it carries
    /// replaces the local one instead of merging into it, so deletions made
    /// elsewhere take effect.
    pub fn replace_sections(&self, sections: Document) -> Result<Document> {
        let _guard = self.write_lock.lock();
        let mut current = self.load();
        current.extend(sections);
        self.backend
            .set_item(&self.key, &serde_json::to_string(&current)?)?;
        debug!(key = %self.key, sections = current.len(), "replaced local sections");
        Ok(current)
    }

    /// Remove the stored document.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.backend.remove_item(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::document::document_from_json;
    use serde_json::json;

    fn store() -> LocalStore<MemoryBackend> {
        LocalStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_load_absent_is_empty() {
        assert!(store().load().is_empty());
    }

    #[test]
    fn test_load_corrupt_is_empty() {
        let store = store();
        store.backend().set_item(APP_DATA_KEY, "{ nope").unwrap();
        assert!(store.load().is_empty());

        store.backend().set_item(APP_DATA_KEY, "[1, 2, 3]").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_merges() {
        let store = store();
        store.save(document_from_json(json!({"a": 1}))).unwrap();
        let merged = store.save(document_from_json(json!({"b": 2}))).unwrap();

        assert_eq!(merged, document_from_json(json!({"a": 1, "b": 2})));
        assert_eq!(store.load(), merged);
    }

    #[test]
    fn test_save_recovers_from_corrupt_value() {
        let store = store();
        store.backend().set_item(APP_DATA_KEY, "garbage").unwrap();

        store.save(document_from_json(json!({"a": 1}))).unwrap();
        assert_eq!(store.load(), document_from_json(json!({"a": 1})));
    }

    #[test]
    fn test_replace_and_clear() {
        let store = store();
        store.save(document_from_json(json!({"a": 1, "b": 2}))).unwrap();

        store.replace(&document_from_json(json!({"c": 3}))).unwrap();
        assert_eq!(store.load(), document_from_json(json!({"c": 3})));

        store.clear().unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_replace_sections_drops_nested_keys() {
        let store = store();
        store
            .save(document_from_json(json!({"tasks": {"a": 1, "b": 2}, "keep": true})))
            .unwrap();

        let merged = store
            .replace_sections(document_from_json(json!({"tasks": {"a": 1}})))
            .unwrap();

        assert_eq!(merged, document_from_json(json!({"tasks": {"a": 1}, "keep": true})));
        assert_eq!(store.load(), merged);
    }

    #[test]
    fn test_custom_key_is_isolated() {
        let backend = Arc::new(MemoryBackend::new());
        let main = LocalStore::new(backend.clone());
        let other = LocalStore::with_key(backend, "lifeops:other");

        main.save(document_from_json(json!({"a": 1}))).unwrap();
        assert!(other.load().is_empty());
        assert_eq!(other.key(), "lifeops:other");
    }
}
