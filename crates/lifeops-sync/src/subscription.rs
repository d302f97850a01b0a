//! Remote change subscription with echo suppression.

use crate::fingerprint::fingerprint;
use crate::remote::{RemoteSnapshot, RemoteStore};
use crate::session::{SessionCore, SyncEvent};
use lifeops_store::Document;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Application callback receiving remote documents.
pub type ChangeHandler = Arc<dyn Fn(Document) + Send + Sync>;

/// What happened to one incoming snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotDisposition {
    /// Forwarded to the application.
    Applied,
    /// Our own unconfirmed write; dropped.
    PendingEcho,
    /// Matches what we already hold; dropped.
    Unchanged,
    /// The remote document does not exist.
    Missing,
    /// The session has ended.
    Closed,
}

/// Live subscription to the remote document. Unsubscribes on drop.
pub struct Subscription {
    abort: AbortHandle,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    /// Stop delivering notifications. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("remote subscription closed");
        }
        self.abort.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Start forwarding remote snapshots for the session's user to `on_change`.
pub(crate) fn subscribe<R: RemoteStore>(
    core: Arc<SessionCore<R>>,
    on_change: ChangeHandler,
) -> Subscription {
    let mut rx = core.remote.subscribe(&core.user_id);
    let closed = Arc::new(AtomicBool::new(false));
    let task_closed = closed.clone();

    let task = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            if task_closed.load(Ordering::SeqCst) {
                break;
            }
            if handle_snapshot(&core, snapshot, &on_change) == SnapshotDisposition::Closed {
                break;
            }
        }
    });

    debug!("remote subscription attached");
    Subscription {
        abort: task.abort_handle(),
        closed,
    }
}

/// Decide whether `snapshot` reaches the application.
pub(crate) fn handle_snapshot<R: RemoteStore>(
    core: &SessionCore<R>,
    snapshot: RemoteSnapshot,
    on_change: &ChangeHandler,
) -> SnapshotDisposition {
    if core.is_torn_down() {
        return SnapshotDisposition::Closed;
    }
    let Some(document) = snapshot.document else {
        return SnapshotDisposition::Missing;
    };

    if snapshot.has_pending_writes {
        trace!(user = %core.user_id, "pending snapshot suppressed");
        core.emit(SyncEvent::EchoSuppressed {
            user_id: core.user_id.clone(),
        });
        return SnapshotDisposition::PendingEcho;
    }

    let fp = fingerprint(&document);
    {
        let mut state = core.state.lock();
        if state.torn_down {
            return SnapshotDisposition::Closed;
        }
        let known = state.last_confirmed.as_ref() == Some(&fp) || state.in_flight.as_ref() == Some(&fp);
        if core.config.skip_identical_snapshots && known {
            trace!(user = %core.user_id, "identical snapshot skipped");
            return SnapshotDisposition::Unchanged;
        }
        state.last_confirmed = Some(fp.clone());
    }

    debug!(user = %core.user_id, fingerprint = fp.short(), "remote change applied");
    core.emit(SyncEvent::RemoteChangeApplied {
        user_id: core.user_id.clone(),
        fingerprint: fp,
    });
    on_change(document);
    SnapshotDisposition::Applied
}

/// Seed the fingerprint (when `seed` is set) and hand `document` to the
/// application unconditionally.
pub(crate) fn deliver<R: RemoteStore>(
    core: &SessionCore<R>,
    document: Document,
    on_change: &ChangeHandler,
    seed: bool,
) -> SnapshotDisposition {
    let fp = fingerprint(&document);
    if seed {
        if !core.seed_fingerprint(fp.clone()) {
            return SnapshotDisposition::Closed;
        }
    } else if core.is_torn_down() {
        return SnapshotDisposition::Closed;
    }

    core.emit(SyncEvent::RemoteChangeApplied {
        user_id: core.user_id.clone(),
        fingerprint: fp,
    });
    on_change(document);
    SnapshotDisposition::Applied
}
