//! LifeOps sync - keeps the local application document and a per-user
//! remote copy in step.
//!
//! Local saves are written immediately and pushed to the remote store
//! through a debounced scheduler. Every remote write passes one gate that
//! skips unchanged documents, backs off after quota and network failures
//! and stamps a server timestamp. Remote changes arrive through a
//! subscription that drops notifications of our own writes.
//!
//! # Quick Start
//!
//! ```rust
//! use lifeops_sync::prelude::*;
//! use lifeops_store::document_from_json;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SyncError> {
//! let remote = Arc::new(MemoryRemoteStore::new());
//! let client = quick::memory_client(remote.clone(), "laptop");
//!
//! // Local edits made before sign-in are migrated on first sign-in.
//! client.save(document_from_json(json!({"upcomingItems": [{"title": "dentist"}]})))?;
//!
//! let report = client
//!     .sign_in(UserId::new("alice"), Arc::new(|doc| println!("remote: {doc:?}")))
//!     .await?;
//! assert!(report.migrated);
//! assert!(remote.document(&UserId::new("alice")).is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`fingerprint`] - Stable content fingerprints for change detection
//! - [`remote`] - Remote store trait and the in-memory implementation
//! - [`gate`] - The single path to the remote store, with cooldowns
//! - [`scheduler`] - Debounced write scheduling
//! - [`subscription`] - Remote change handling and echo suppression
//! - [`bootstrap`] - First-sign-in migration and hydration
//! - [`session`] - Per-user session state and events
//! - [`client`] - Sign-in, sign-out and local saves
//! - [`config`] - Timing configuration
//! - [`error`] - Error types

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod subscription;

// Re-exports for convenience
pub use bootstrap::{BootstrapReport, MigrationLedger, StateSource, MIGRATED_AT_KEY};
pub use client::{quick, ClientConfig, ClientConfigBuilder, SyncClient};
pub use config::{SyncConfig, SyncConfigBuilder};
pub use error::{ErrorCode, FailureClass, RemoteError, Result, SyncError};
pub use fingerprint::{fingerprint, fingerprint_of, Fingerprint, VOLATILE_KEYS};
pub use gate::{SkipReason, SyncGate, WriteOutcome, UPDATED_AT_KEY};
pub use remote::{MemoryRemoteStore, RemoteSnapshot, RemoteStore, UserId, WriteRecord};
pub use scheduler::WriteScheduler;
pub use session::{GatePhase, SessionId, SyncEvent, SyncSession, SyncStatus};
pub use subscription::{ChangeHandler, SnapshotDisposition, Subscription};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{quick, ClientConfig, SyncClient};
    pub use crate::config::SyncConfig;
    pub use crate::error::SyncError;
    pub use crate::gate::WriteOutcome;
    pub use crate::remote::{MemoryRemoteStore, RemoteStore, UserId};
    pub use crate::session::{GatePhase, SyncEvent, SyncSession, SyncStatus};
    pub use crate::subscription::ChangeHandler;
}
