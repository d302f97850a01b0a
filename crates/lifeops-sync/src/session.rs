//! Per-user sync sessions.
//!
//! A [`SyncSession`] exists from sign-in to sign-out for one user on one
//! client. It owns the write scheduler, the sync gate and the remote
//! subscription, and all of them share one [`SessionCore`]. Teardown
//! invalidates the core, so work that completes afterwards (a write that
//! was in flight, a late notification) cannot touch session state.

use crate::bootstrap::{run_bootstrap, BootstrapReport, MigrationLedger};
use crate::config::SyncConfig;
use crate::error::{FailureClass, RemoteError, Result, SyncError};
use crate::fingerprint::Fingerprint;
use crate::gate::{SkipReason, SyncGate, WriteOutcome};
use crate::remote::{RemoteStore, UserId};
use crate::scheduler::WriteScheduler;
use crate::subscription::{subscribe, ChangeHandler, Subscription};
use lifeops_store::Document;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, OnceCell};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

/// Identity of one session. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Ulid);

impl SessionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events emitted by sync sessions.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A session was created at sign-in.
    SessionStarted {
        session_id: SessionId,
        user_id: UserId,
    },
    /// A session was torn down.
    SessionEnded {
        session_id: SessionId,
        user_id: UserId,
    },
    /// A write was handed to the debouncer.
    WriteScheduled { user_id: UserId, delay: Duration },
    /// The gate dropped a write without contacting the remote store.
    WriteSkipped { user_id: UserId, reason: SkipReason },
    /// A write reached the remote store.
    WriteCommitted {
        user_id: UserId,
        fingerprint: Fingerprint,
    },
    /// A recoverable failure started a cooldown.
    CooldownStarted {
        user_id: UserId,
        class: FailureClass,
        until: Instant,
    },
    /// A write failed with a non-recoverable error.
    WriteFailed { user_id: UserId, error: RemoteError },
    /// A remote change was forwarded to the application.
    RemoteChangeApplied {
        user_id: UserId,
        fingerprint: Fingerprint,
    },
    /// A notification of our own pending write was dropped.
    EchoSuppressed { user_id: UserId },
    /// The local document was uploaded as the first remote copy.
    MigrationPerformed { user_id: UserId },
}

/// Where the sync gate currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatePhase {
    Idle,
    CoolingDown { until: Instant },
    Writing,
}

/// Read-only view of a session for display.
#[derive(Clone, Debug)]
pub struct SyncStatus {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub phase: GatePhase,
    /// Writes are suppressed until this instant, if set.
    pub suppressed_until: Option<Instant>,
    pub last_fatal_error: Option<RemoteError>,
    pub last_confirmed: Option<Fingerprint>,
    pub migrated: bool,
    /// The first sync after sign-in has delivered a document.
    pub hydrated: bool,
    pub write_pending: bool,
    pub active: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub last_confirmed: Option<Fingerprint>,
    /// Fingerprint of the write currently in flight.
    pub in_flight: Option<Fingerprint>,
    pub cooldown_until: Option<Instant>,
    pub migrated: bool,
    pub hydrated: bool,
    /// A save arrived before hydration and has not been sent.
    pub held_write: bool,
    pub last_fatal_error: Option<RemoteError>,
    pub torn_down: bool,
}

/// State shared by every component of a session.
pub(crate) struct SessionCore<R: RemoteStore> {
    pub id: SessionId,
    pub user_id: UserId,
    pub remote: Arc<R>,
    pub config: SyncConfig,
    pub state: Mutex<SessionState>,
    pub migrations: MigrationLedger,
    events: broadcast::Sender<SyncEvent>,
}

impl<R: RemoteStore> SessionCore<R> {
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.lock().torn_down
    }

    /// Record `fingerprint` as what the remote store holds. Returns false if
    /// the session is gone.
    pub fn seed_fingerprint(&self, fingerprint: Fingerprint) -> bool {
        let mut state = self.state.lock();
        if state.torn_down {
            return false;
        }
        state.last_confirmed = Some(fingerprint);
        true
    }

    pub fn mark_hydrated(&self) {
        let mut state = self.state.lock();
        if !state.torn_down {
            state.hydrated = true;
        }
    }

    /// Apply the result of a remote write. The only place write results
    /// reach session state.
    pub fn apply_write_result(
        &self,
        fingerprint: Fingerprint,
        result: std::result::Result<(), RemoteError>,
    ) -> Result<WriteOutcome> {
        let mut state = self.state.lock();
        if state.torn_down {
            return Ok(WriteOutcome::Discarded);
        }
        state.in_flight = None;

        let error = match result {
            Ok(()) => {
                state.last_confirmed = Some(fingerprint.clone());
                state.cooldown_until = None;
                drop(state);
                info!(user = %self.user_id, fingerprint = fingerprint.short(), "remote write committed");
                self.emit(SyncEvent::WriteCommitted {
                    user_id: self.user_id.clone(),
                    fingerprint: fingerprint.clone(),
                });
                return Ok(WriteOutcome::Written(fingerprint));
            }
            Err(error) => error,
        };

        let class = error.class();
        let cooldown = match class {
            FailureClass::QuotaExhausted => self.config.quota_cooldown(),
            FailureClass::Transient => self.config.transient_cooldown(),
            FailureClass::Fatal => {
                state.last_fatal_error = Some(error.clone());
                drop(state);
                error!(user = %self.user_id, %error, "remote write failed");
                self.emit(SyncEvent::WriteFailed {
                    user_id: self.user_id.clone(),
                    error: error.clone(),
                });
                return Err(SyncError::Remote(error));
            }
        };

        let until = Instant::now() + cooldown;
        state.cooldown_until = Some(until);
        drop(state);
        warn!(
            user = %self.user_id,
            %error,
            cooldown_ms = cooldown.as_millis() as u64,
            "remote write suppressed, cooling down"
        );
        self.emit(SyncEvent::CooldownStarted {
            user_id: self.user_id.clone(),
            class,
            until,
        });
        Ok(WriteOutcome::Suppressed {
            class,
            until,
            error,
        })
    }
}

/// Sync state for one signed-in user on one client.
pub struct SyncSession<R: RemoteStore> {
    core: Arc<SessionCore<R>>,
    gate: Arc<SyncGate<R>>,
    scheduler: WriteScheduler,
    subscription: Mutex<Option<Subscription>>,
    bootstrap: OnceCell<BootstrapReport>,
}

impl<R: RemoteStore> SyncSession<R> {
    /// Create a session with its own migration ledger and start its write
    /// scheduler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        user_id: UserId,
        remote: Arc<R>,
        config: SyncConfig,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self::with_migrations(user_id, remote, config, events, MigrationLedger::new())
    }

    /// Create a session that records migration claims in `migrations`.
    pub fn with_migrations(
        user_id: UserId,
        remote: Arc<R>,
        config: SyncConfig,
        events: broadcast::Sender<SyncEvent>,
        migrations: MigrationLedger,
    ) -> Self {
        let core = Arc::new(SessionCore {
            id: SessionId::new(),
            user_id,
            remote,
            config,
            state: Mutex::new(SessionState::default()),
            migrations,
            events,
        });
        let gate = Arc::new(SyncGate::new(core.clone()));
        let scheduler = WriteScheduler::spawn(gate.clone());

        info!(user = %core.user_id, session = %core.id, "sync session started");
        core.emit(SyncEvent::SessionStarted {
            session_id: core.id,
            user_id: core.user_id.clone(),
        });

        Self {
            core,
            gate,
            scheduler,
            subscription: Mutex::new(None),
            bootstrap: OnceCell::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.core.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.core.user_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.core.config
    }

    pub fn is_active(&self) -> bool {
        !self.core.is_torn_down()
    }

    /// Subscribe to this session's events (shared with its client).
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.core.events.subscribe()
    }

    /// Queue `document` for a debounced remote write with the configured delay.
    pub fn schedule(&self, document: Document) {
        self.schedule_with_delay(document, self.core.config.debounce());
    }

    /// Queue `document` for a remote write after `delay` of quiet.
    pub fn schedule_with_delay(&self, document: Document, delay: Duration) {
        if self.scheduler.schedule(document, delay) {
            self.core.emit(SyncEvent::WriteScheduled {
                user_id: self.core.user_id.clone(),
                delay,
            });
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.core.state.lock().hydrated
    }

    /// Before the first sync has finished, record that a write is owed and
    /// return true. Returns false once hydrated or after teardown.
    pub fn hold_if_hydrating(&self) -> bool {
        {
            let mut state = self.core.state.lock();
            if state.torn_down || state.hydrated {
                return false;
            }
            state.held_write = true;
        }
        debug!(user = %self.core.user_id, "write held until the first sync completes");
        self.core.emit(SyncEvent::WriteSkipped {
            user_id: self.core.user_id.clone(),
            reason: SkipReason::Hydrating,
        });
        true
    }

    /// Schedule `document` unless the first sync is still running, in
    /// which case the write is held. Returns true if it was scheduled.
    pub fn schedule_if_hydrated(&self, document: Document) -> bool {
        if self.hold_if_hydrating() {
            return false;
        }
        self.schedule(document);
        true
    }

    /// Clear the held-write flag, returning whether a write was held.
    pub fn take_held_write(&self) -> bool {
        std::mem::take(&mut self.core.state.lock().held_write)
    }

    /// Drop any write waiting in the debouncer.
    pub fn cancel_pending(&self) {
        self.scheduler.cancel();
    }

    /// Send `document` through the sync gate now, bypassing the debouncer.
    pub async fn write_now(&self, document: Document) -> Result<WriteOutcome> {
        self.gate.submit(document).await
    }

    /// Run the migration/bootstrap sequence. Runs at most once per session;
    /// later or concurrent calls get the first run's report.
    pub async fn bootstrap(
        &self,
        local: Document,
        on_change: ChangeHandler,
    ) -> Result<BootstrapReport> {
        let report = self
            .bootstrap
            .get_or_try_init(|| run_bootstrap(&self.core, &self.gate, local, on_change))
            .await?;
        Ok(report.clone())
    }

    /// Attach the remote subscription. Returns false if one is already
    /// attached or the session is gone.
    pub fn attach(&self, on_change: ChangeHandler) -> bool {
        if self.core.is_torn_down() {
            return false;
        }
        let mut slot = self.subscription.lock();
        if slot.as_ref().is_some_and(Subscription::is_active) {
            return false;
        }
        *slot = Some(subscribe(self.core.clone(), on_change));
        true
    }

    /// Detach the remote subscription, if any.
    pub fn detach(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    /// Bootstrap, then attach the subscription.
    pub async fn start(&self, local: Document, on_change: ChangeHandler) -> Result<BootstrapReport> {
        let report = self.bootstrap(local, on_change.clone()).await?;
        self.attach(on_change);
        Ok(report)
    }

    pub fn status(&self) -> SyncStatus {
        let writing = self.gate.is_writing();
        let state = self.core.state.lock();
        let now = Instant::now();
        let suppressed_until = state.cooldown_until.filter(|until| *until > now);

        let phase = match (writing, suppressed_until) {
            (true, _) => GatePhase::Writing,
            (false, Some(until)) => GatePhase::CoolingDown { until },
            (false, None) => GatePhase::Idle,
        };

        SyncStatus {
            session_id: self.core.id,
            user_id: self.core.user_id.clone(),
            phase,
            suppressed_until,
            last_fatal_error: state.last_fatal_error.clone(),
            last_confirmed: state.last_confirmed.clone(),
            migrated: state.migrated,
            hydrated: state.hydrated,
            write_pending: self.scheduler.has_pending(),
            active: !state.torn_down,
        }
    }

    /// Tear the session down: cancel the pending write, detach the
    /// subscription and clear all sync state. Safe to call repeatedly.
    pub fn teardown(&self) {
        {
            let mut state = self.core.state.lock();
            if state.torn_down {
                return;
            }
            *state = SessionState {
                torn_down: true,
                ..SessionState::default()
            };
        }

        self.scheduler.shutdown();
        self.detach();

        info!(user = %self.core.user_id, session = %self.core.id, "sync session ended");
        self.core.emit(SyncEvent::SessionEnded {
            session_id: self.core.id,
            user_id: self.core.user_id.clone(),
        });
    }
}

impl<R: RemoteStore> Drop for SyncSession<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}
