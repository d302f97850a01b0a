//! The sync gate: the only path to the remote store.
//!
//! Every remote write, debounced or not, goes through [`SyncGate::submit`],
//! which serializes writes, enforces cooldowns, drops unchanged documents
//! and stamps the server timestamp.

use crate::error::{FailureClass, RemoteError, Result};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::remote::RemoteStore;
use crate::session::{SessionCore, SyncEvent};
use lifeops_store::{Document, Timestamp};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Field stamped with the server time on every write.
pub const UPDATED_AT_KEY: &str = "updatedAt";

/// Why a write was dropped without contacting the remote store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The document matches what the remote store already holds.
    Unchanged,
    /// A cooldown is active.
    CoolingDown { until: Instant },
    /// The first sync after sign-in has not finished; the write is held.
    Hydrating,
}

/// Result of a submission to the gate.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// The remote store accepted the write.
    Written(Fingerprint),
    Skipped(SkipReason),
    /// The write failed recoverably and was dropped; a cooldown started.
    Suppressed {
        class: FailureClass,
        until: Instant,
        error: RemoteError,
    },
    /// The session ended before or during the write.
    Discarded,
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written(_))
    }
}

pub struct SyncGate<R: RemoteStore> {
    core: Arc<SessionCore<R>>,
    in_flight: Mutex<()>,
}

impl<R: RemoteStore> SyncGate<R> {
    pub(crate) fn new(core: Arc<SessionCore<R>>) -> Self {
        Self {
            core,
            in_flight: Mutex::new(()),
        }
    }

    /// True while a write is outstanding.
    pub fn is_writing(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Write `document` to the remote store unless a cooldown is active or
    /// it is unchanged. Concurrent submissions wait for the outstanding
    /// write and are then checked against its result.
    ///
    /// Recoverable failures resolve to [`WriteOutcome::Suppressed`]; any
    /// other remote failure is returned as an error.
    pub async fn submit(&self, document: Document) -> Result<WriteOutcome> {
        let _permit = self.in_flight.lock().await;
        let core = &self.core;
        let fp = fingerprint(&document);

        {
            let mut state = core.state.lock();
            if state.torn_down {
                return Ok(WriteOutcome::Discarded);
            }

            let now = Instant::now();
            let reason = match state.cooldown_until {
                Some(until) if until > now => Some(SkipReason::CoolingDown { until }),
                _ if state.last_confirmed.as_ref() == Some(&fp) => Some(SkipReason::Unchanged),
                _ => None,
            };

            if let Some(reason) = reason {
                drop(state);
                debug!(user = %core.user_id, ?reason, "remote write skipped");
                core.emit(SyncEvent::WriteSkipped {
                    user_id: core.user_id.clone(),
                    reason,
                });
                return Ok(WriteOutcome::Skipped(reason));
            }

            state.cooldown_until = None;
            state.in_flight = Some(fp.clone());
        }

        let mut patch = document;
        patch.insert(UPDATED_AT_KEY.to_string(), Timestamp::now().into());

        debug!(user = %core.user_id, fingerprint = fp.short(), "writing to remote");
        let result = core.remote.merge_write(&core.user_id, patch).await;
        core.apply_write_result(fp, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::error::{ErrorCode, SyncError};
    use crate::remote::{MemoryRemoteStore, UserId};
    use crate::session::SyncSession;
    use lifeops_store::{document_from_json, Value};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn session(remote: &Arc<MemoryRemoteStore>) -> SyncSession<MemoryRemoteStore> {
        let (events, _) = broadcast::channel(100);
        SyncSession::new(
            UserId::new("u1"),
            remote.clone(),
            SyncConfig::default(),
            events,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_document_written_once() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let session = session(&remote);
        let doc = document_from_json(json!({"tasks": [1, 2]}));

        assert!(session.write_now(doc.clone()).await.unwrap().is_written());
        assert_eq!(
            session.write_now(doc).await.unwrap(),
            WriteOutcome::Skipped(SkipReason::Unchanged)
        );
        assert_eq!(remote.write_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_is_stamped_with_updated_at() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let session = session(&remote);

        session
            .write_now(document_from_json(json!({"a": 1})))
            .await
            .unwrap();

        let written = &remote.writes()[0].patch;
        assert!(matches!(written.get(UPDATED_AT_KEY), Some(Value::Timestamp(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_failure_suppresses_for_sixty_seconds() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let session = session(&remote);
        remote.fail_next_write(crate::error::RemoteError::new(
            ErrorCode::ResourceExhausted,
            "quota",
        ));

        let outcome = session
            .write_now(document_from_json(json!({"a": 1})))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            WriteOutcome::Suppressed {
                class: FailureClass::QuotaExhausted,
                ..
            }
        ));

        tokio::time::sleep(Duration::from_secs(59)).await;
        let outcome = session
            .write_now(document_from_json(json!({"a": 2})))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            WriteOutcome::Skipped(SkipReason::CoolingDown { .. })
        ));
        assert_eq!(remote.write_calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let outcome = session
            .write_now(document_from_json(json!({"a": 3})))
            .await
            .unwrap();
        assert!(outcome.is_written());
        assert_eq!(remote.write_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_propagates_without_cooldown() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let session = session(&remote);
        remote.fail_next_write(crate::error::RemoteError::new(
            ErrorCode::PermissionDenied,
            "denied",
        ));

        let err = session
            .write_now(document_from_json(json!({"a": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote(ref e) if e.code == ErrorCode::PermissionDenied));

        // no cooldown: the same document goes out again
        let outcome = session
            .write_now(document_from_json(json!({"a": 1})))
            .await
            .unwrap();
        assert!(outcome.is_written());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submissions_serialize() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_latency(Duration::from_millis(100));
        let session = session(&remote);
        let doc = document_from_json(json!({"a": 1}));

        let (first, second) = tokio::join!(
            session.write_now(doc.clone()),
            session.write_now(doc.clone())
        );

        assert!(first.unwrap().is_written());
        assert_eq!(
            second.unwrap(),
            WriteOutcome::Skipped(SkipReason::Unchanged)
        );
        assert_eq!(remote.write_calls(), 1);
    }
}
