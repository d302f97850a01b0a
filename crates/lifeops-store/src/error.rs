//! Error types for the local store layer.

use thiserror::Error;

/// Errors that can occur while reading or writing local storage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Daily entry must include day (YYYY-MM-DD)")]
    MissingDay,

    #[error("Invalid day: {0} (expected YYYY-MM-DD)")]
    InvalidDay(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors raised when importing or exporting a backup snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackupError {
    #[error("This backup file is not for Life Ops.")]
    WrongApp,

    #[error("Backup file is missing local keys.")]
    MissingKeys,

    #[error("Invalid JSON file: {0}")]
    InvalidJson(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
