//! # lifeops-store
//!
//! Local persistence for LifeOps.
//!
//! This crate provides:
//! - The [`Document`] model: JSON plus an explicitly tagged server [`Timestamp`]
//! - Deep merge and the "has meaningful data" predicate used by migration
//! - [`LocalStore`]: one JSON document under one namespaced key, over any
//!   synchronous [`StorageBackend`]
//! - The daily history log and the support profile
//! - Backup export/import of every application key
//!
//! ## Example
//!
//! ```rust
//! use lifeops_store::{document_from_json, LocalStore, MemoryBackend};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = LocalStore::new(Arc::new(MemoryBackend::new()));
//! store.save(document_from_json(json!({"a": 1}))).unwrap();
//! store.save(document_from_json(json!({"b": 2}))).unwrap();
//!
//! assert_eq!(store.load(), document_from_json(json!({"a": 1, "b": 2})));
//! ```

pub mod backend;
pub mod backup;
pub mod document;
pub mod error;
pub mod history;
pub mod local;
pub mod support;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use backup::{
    clear_app_keys, export_snapshot, import_snapshot, parse_snapshot, read_snapshot_file,
    write_snapshot_file, BackupMeta, BackupSnapshot, ImportMode,
};
pub use document::{
    deep_merge, document_from_json, document_to_json, has_meaningful_data, Document, Timestamp,
    Value,
};
pub use error::{BackupError, Result, StoreError};
pub use history::{daily_history, log_today_snapshot, upsert_daily_entry, DailyEntry, DaySnapshot};
pub use local::{LocalStore, APP_DATA_KEY, APP_PREFIX};
pub use support::{
    get_support_profile, set_support_profile, SupportProfile, TrustedPerson, SUPPORT_PROFILE_KEY,
};
