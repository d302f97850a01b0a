//! Backup export and import of this application's storage keys.
//!
//! Only keys under [`APP_PREFIX`] are touched, so other data sharing the
//! same backend is left alone.

use crate::backend::StorageBackend;
use crate::error::{BackupError, StoreError};
use crate::local::APP_PREFIX;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const BACKUP_APP: &str = "life-ops";
pub const BACKUP_VERSION: u32 = 1;
pub const BACKUP_SCOPE: &str = "localStorage";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    pub app: String,
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub scope: String,
    pub prefix: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalKeys {
    pub keys: BTreeMap<String, String>,
}

/// A full export of the application's keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub meta: BackupMeta,
    pub local: LocalKeys,
}

/// How an import treats keys already present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImportMode {
    /// Clear every application key first.
    #[default]
    Replace,
    /// Keep existing keys, overwriting only the ones in the backup.
    Merge,
}

fn app_keys<B: StorageBackend + ?Sized>(backend: &B) -> Vec<String> {
    backend
        .keys()
        .into_iter()
        .filter(|k| k.starts_with(APP_PREFIX))
        .collect()
}

/// Export every application key.
pub fn export_snapshot<B: StorageBackend + ?Sized>(backend: &B) -> BackupSnapshot {
    let keys = app_keys(backend)
        .into_iter()
        .filter_map(|k| backend.get_item(&k).map(|v| (k, v)))
        .collect();

    BackupSnapshot {
        meta: BackupMeta {
            app: BACKUP_APP.to_string(),
            version: BACKUP_VERSION,
            exported_at: Utc::now(),
            scope: BACKUP_SCOPE.to_string(),
            prefix: APP_PREFIX.to_string(),
        },
        local: LocalKeys { keys },
    }
}

/// Restore `snapshot` into `backend`. Returns the number of keys written.
pub fn import_snapshot<B: StorageBackend + ?Sized>(
    backend: &B,
    snapshot: &BackupSnapshot,
    mode: ImportMode,
) -> Result<usize, BackupError> {
    if snapshot.meta.app != BACKUP_APP {
        return Err(BackupError::WrongApp);
    }

    if mode == ImportMode::Replace {
        clear_app_keys(backend)?;
    }

    let mut written = 0;
    for (key, value) in &snapshot.local.keys {
        if !key.starts_with(APP_PREFIX) {
            continue;
        }
        backend.set_item(key, value)?;
        written += 1;
    }

    info!(written, ?mode, "imported backup snapshot");
    Ok(written)
}

/// Remove every application key. Returns how many were removed.
pub fn clear_app_keys<B: StorageBackend + ?Sized>(backend: &B) -> Result<usize, StoreError> {
    let keys = app_keys(backend);
    for key in &keys {
        backend.remove_item(key)?;
    }
    Ok(keys.len())
}

/// Parse a snapshot from JSON text, checking the app tag and key block
/// before the full shape.
pub fn parse_snapshot(text: &str) -> Result<BackupSnapshot, BackupError> {
    let raw: serde_json::Value =
        serde_json::from_str(text).map_err(|e| BackupError::InvalidJson(e.to_string()))?;

    if raw.pointer("/meta/app").and_then(|v| v.as_str()) != Some(BACKUP_APP) {
        return Err(BackupError::WrongApp);
    }
    if !raw.pointer("/local/keys").is_some_and(|v| v.is_object()) {
        return Err(BackupError::MissingKeys);
    }

    serde_json::from_value(raw).map_err(|e| BackupError::InvalidJson(e.to_string()))
}

/// Render a snapshot as pretty JSON.
pub fn snapshot_to_json(snapshot: &BackupSnapshot) -> Result<String, BackupError> {
    serde_json::to_string_pretty(snapshot).map_err(|e| StoreError::from(e).into())
}

pub fn read_snapshot_file(path: impl AsRef<Path>) -> Result<BackupSnapshot, BackupError> {
    let text = std::fs::read_to_string(path).map_err(StoreError::from)?;
    parse_snapshot(&text)
}

pub fn write_snapshot_file(
    path: impl AsRef<Path>,
    snapshot: &BackupSnapshot,
) -> Result<(), BackupError> {
    std::fs::write(path, snapshot_to_json(snapshot)?).map_err(StoreError::from)?;
    Ok(())
}
