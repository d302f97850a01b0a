//! First-sign-in migration and initial state delivery.
//!
//! On sign-in the remote document is read once. If it does not exist and
//! the local document holds meaningful data, the local document is
//! uploaded, at most once per user for the lifetime of the client. The
//! remote document, or the local one when there is no remote copy, is then
//! handed to the application.

use crate::error::{RemoteError, Result, SyncError};
use crate::gate::{SyncGate, WriteOutcome};
use crate::remote::{RemoteStore, UserId};
use crate::session::{SessionCore, SyncEvent};
use crate::subscription::{deliver, ChangeHandler};
use lifeops_store::{has_meaningful_data, Document, Timestamp};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Field stamped on the migration upload.
pub const MIGRATED_AT_KEY: &str = "migratedAt";

/// Users whose local data has been claimed for migration.
///
/// A client shares one ledger with every session it creates, so a claim
/// outlives sign-out and a sign-in/sign-out/sign-in flap cannot upload the
/// same local data twice.
#[derive(Clone, Debug, Default)]
pub struct MigrationLedger {
    claimed: Arc<Mutex<HashSet<UserId>>>,
}

impl MigrationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the migration for `user_id`. Returns false if it was already
    /// claimed.
    pub fn claim(&self, user_id: &UserId) -> bool {
        self.claimed.lock().insert(user_id.clone())
    }

    /// Give a claim back after a migration that wrote nothing.
    pub fn release(&self, user_id: &UserId) {
        self.claimed.lock().remove(user_id);
    }

    pub fn is_claimed(&self, user_id: &UserId) -> bool {
        self.claimed.lock().contains(user_id)
    }
}

/// Which copy the application was hydrated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateSource {
    Remote,
    Local,
}

/// Result of a bootstrap run.
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapReport {
    pub source: StateSource,
    /// True if this run attempted the migration upload.
    pub migrated: bool,
    pub migration: Option<WriteOutcome>,
    /// Set when the remote read failed recoverably.
    pub read_error: Option<RemoteError>,
    /// The document handed to the application.
    pub document: Document,
}

pub(crate) async fn run_bootstrap<R: RemoteStore>(
    core: &Arc<SessionCore<R>>,
    gate: &SyncGate<R>,
    local: Document,
    on_change: ChangeHandler,
) -> Result<BootstrapReport> {
    let (remote_doc, read_error) = match core.remote.get(&core.user_id).await {
        Ok(doc) => (doc, None),
        Err(error) if error.is_recoverable() => {
            warn!(user = %core.user_id, %error, "remote read failed, using local state");
            (None, Some(error))
        }
        Err(error) => return Err(SyncError::Remote(error)),
    };

    let should_migrate = remote_doc.is_none()
        && read_error.is_none()
        && has_meaningful_data(&local)
        && claim_migration(core);

    let migration = if should_migrate {
        let mut payload = local.clone();
        payload.insert(MIGRATED_AT_KEY.to_string(), Timestamp::now().into());
        let outcome = match gate.submit(payload).await {
            Ok(outcome) => outcome,
            Err(err) => {
                core.migrations.release(&core.user_id);
                return Err(err);
            }
        };
        if outcome.is_written() {
            info!(user = %core.user_id, "local data migrated to remote");
            core.emit(SyncEvent::MigrationPerformed {
                user_id: core.user_id.clone(),
            });
        }
        Some(outcome)
    } else {
        None
    };

    let (source, document) = match remote_doc {
        Some(doc) => (StateSource::Remote, doc),
        None => (StateSource::Local, local),
    };

    // Only seed from local state the remote store is known to match.
    let seed = match source {
        StateSource::Remote => true,
        StateSource::Local => {
            read_error.is_none()
                && match &migration {
                    Some(outcome) => outcome.is_written(),
                    None => !has_meaningful_data(&document),
                }
        }
    };
    deliver(core, document.clone(), &on_change, seed);
    core.mark_hydrated();

    Ok(BootstrapReport {
        source,
        migrated: should_migrate,
        migration,
        read_error,
        document,
    })
}

/// Claim the migration in the client's ledger and set the session's
/// migrated flag. Returns false if either was already taken.
fn claim_migration<R: RemoteStore>(core: &SessionCore<R>) -> bool {
    let mut state = core.state.lock();
    if state.torn_down || state.migrated {
        return false;
    }
    if !core.migrations.claim(&core.user_id) {
        debug!(user = %core.user_id, "migration already claimed by an earlier session");
        return false;
    }
    state.migrated = true;
    true
}
