//! Error types for the sync layer.

use lifeops_store::StoreError;
use std::fmt;
use thiserror::Error;

/// Error codes reported by the remote document store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Quota or rate limit hit.
    ResourceExhausted,
    /// Network or backend unreachable.
    Unavailable,
    /// The request timed out.
    DeadlineExceeded,
    PermissionDenied,
    InvalidArgument,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ResourceExhausted => "resource-exhausted",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::DeadlineExceeded => "deadline-exceeded",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::Other(code) => code,
        }
    }

    /// Parse a wire code. Unknown codes are kept verbatim.
    pub fn parse(code: &str) -> Self {
        match code {
            "resource-exhausted" => ErrorCode::ResourceExhausted,
            "unavailable" => ErrorCode::Unavailable,
            "deadline-exceeded" => ErrorCode::DeadlineExceeded,
            "permission-denied" => ErrorCode::PermissionDenied,
            "invalid-argument" => ErrorCode::InvalidArgument,
            other => ErrorCode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failed remote write is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Rate limited: long cooldown, write dropped.
    QuotaExhausted,
    /// Network trouble: short cooldown, write dropped.
    Transient,
    /// Anything else: surfaced to the caller.
    Fatal,
}

/// A failure reported by the remote document store.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        match self.code {
            ErrorCode::ResourceExhausted => FailureClass::QuotaExhausted,
            ErrorCode::Unavailable | ErrorCode::DeadlineExceeded => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }

    /// Whether the sync gate absorbs this failure with a cooldown.
    pub fn is_recoverable(&self) -> bool {
        self.class() != FailureClass::Fatal
    }
}

/// Error type for sync operations.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum SyncError {
    /// A remote failure that is not absorbed by a cooldown.
    #[error("Remote write failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local store error: {0}")]
    Local(#[from] StoreError),

    #[error("Not signed in")]
    NotSignedIn,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let quota = RemoteError::new(ErrorCode::ResourceExhausted, "quota");
        let offline = RemoteError::new(ErrorCode::Unavailable, "offline");
        let slow = RemoteError::new(ErrorCode::DeadlineExceeded, "slow");
        let denied = RemoteError::new(ErrorCode::PermissionDenied, "nope");

        assert_eq!(quota.class(), FailureClass::QuotaExhausted);
        assert_eq!(offline.class(), FailureClass::Transient);
        assert_eq!(slow.class(), FailureClass::Transient);
        assert_eq!(denied.class(), FailureClass::Fatal);
        assert!(!denied.is_recoverable());
        assert!(quota.is_recoverable());
    }

    #[test]
    fn test_code_parse_roundtrip() {
        for code in [
            ErrorCode::ResourceExhausted,
            ErrorCode::Unavailable,
            ErrorCode::DeadlineExceeded,
            ErrorCode::PermissionDenied,
            ErrorCode::InvalidArgument,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), code);
        }
        assert_eq!(
            ErrorCode::parse("aborted"),
            ErrorCode::Other("aborted".to_string())
        );
    }

    #[test]
    fn test_display() {
        let err = RemoteError::new(ErrorCode::PermissionDenied, "missing rule");
        assert_eq!(err.to_string(), "permission-denied: missing rule");
        assert_eq!(
            SyncError::from(err).to_string(),
            "Remote write failed: permission-denied: missing rule"
        );
    }
}
