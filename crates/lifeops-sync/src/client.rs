//! High-level client tying the local store to a remote sync session.

use crate::bootstrap::{BootstrapReport, MigrationLedger};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fingerprint::is_volatile;
use crate::gate::{SkipReason, WriteOutcome};
use crate::remote::{MemoryRemoteStore, RemoteStore, UserId};
use crate::session::{SyncEvent, SyncSession, SyncStatus};
use crate::subscription::ChangeHandler;
use lifeops_store::{Document, LocalStore, MemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Configuration for the sync client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Name of this device, for logs.
    pub device_name: String,
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_name: "device".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

/// Builder for client configuration.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.config.device_name = name.into();
        self
    }

    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The LifeOps sync client.
///
/// Owns the local store and at most one [`SyncSession`]. Local saves are
/// persisted immediately and, once the first sync after sign-in has
/// finished, scheduled for a debounced remote write. Remote changes are
/// persisted locally before the application callback runs.
///
/// # Example
///
/// ```rust
/// use lifeops_sync::{quick, MemoryRemoteStore, UserId};
/// use lifeops_store::document_from_json;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = Arc::new(MemoryRemoteStore::new());
/// let client = quick::memory_client(remote.clone(), "laptop");
///
/// client.sign_in(UserId::new("alice"), Arc::new(|_doc| {})).await?;
/// client.save(document_from_json(serde_json::json!({"tasksByDate": {}})))?;
/// client.flush().await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncClient<R: RemoteStore, B: StorageBackend> {
    config: ClientConfig,
    remote: Arc<R>,
    local: Arc<LocalStore<B>>,
    active: RwLock<Option<Arc<SyncSession<R>>>>,
    migrations: MigrationLedger,
    events: broadcast::Sender<SyncEvent>,
}

impl<R: RemoteStore, B: StorageBackend + 'static> SyncClient<R, B> {
    pub fn new(remote: Arc<R>, local: Arc<LocalStore<B>>, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.sync.event_capacity.max(1));
        Self {
            config,
            remote,
            local,
            active: RwLock::new(None),
            migrations: MigrationLedger::new(),
            events,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.config.device_name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn local(&self) -> &Arc<LocalStore<B>> {
        &self.local
    }

    /// Subscribe to events from every session this client creates.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The active session, if signed in.
    pub fn session(&self) -> Option<Arc<SyncSession<R>>> {
        self.active.read().clone()
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.active.read().as_ref().map(|s| s.user_id().clone())
    }

    pub fn status(&self) -> Option<SyncStatus> {
        self.session().map(|s| s.status())
    }

    /// Migration claims shared by every session of this client.
    pub fn migrations(&self) -> &MigrationLedger {
        &self.migrations
    }

    /// The local document.
    pub fn load(&self) -> Document {
        self.local.load()
    }

    /// Sign `user_id` in: create (or reuse) their session, run the
    /// bootstrap sequence and attach the remote subscription.
    ///
    /// Signing in as a different user tears the previous session down. If
    /// the sequence fails the new session is torn down and the client is
    /// left signed out. Saves made while the sequence runs are held and
    /// sent, rebuilt from the local store, once it completes.
    pub async fn sign_in(
        &self,
        user_id: UserId,
        on_change: ChangeHandler,
    ) -> Result<BootstrapReport> {
        let session = {
            let mut active = self.active.write();
            match active.as_ref() {
                Some(session) if session.user_id() == &user_id && session.is_active() => {
                    session.clone()
                }
                _ => {
                    let session = Arc::new(SyncSession::with_migrations(
                        user_id.clone(),
                        self.remote.clone(),
                        self.config.sync.clone(),
                        self.events.clone(),
                        self.migrations.clone(),
                    ));
                    if let Some(previous) = active.replace(session.clone()) {
                        previous.teardown();
                    }
                    info!(device = %self.config.device_name, user = %user_id, "signed in");
                    session
                }
            }
        };

        let handler = self.persisting_handler(on_change);
        match session.start(self.local.load(), handler).await {
            Ok(report) => {
                if session.take_held_write() {
                    session.schedule(self.local.load());
                }
                Ok(report)
            }
            Err(err) => {
                self.abandon(&session);
                warn!(device = %self.config.device_name, user = %session.user_id(), %err, "sign-in failed");
                Err(err)
            }
        }
    }

    /// Drop `session` if it is still the active one, then tear it down.
    fn abandon(&self, session: &Arc<SyncSession<R>>) {
        {
            let mut active = self.active.write();
            if active.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
                active.take();
            }
        }
        session.teardown();
    }

    /// Tear down the active session, if any. Local data is kept.
    pub fn sign_out(&self) {
        let previous = self.active.write().take();
        if let Some(session) = previous {
            session.teardown();
            info!(device = %self.config.device_name, user = %session.user_id(), "signed out");
        }
    }

    /// React to an authentication change: sign in for `Some`, sign out for
    /// `None`.
    pub async fn on_auth_changed(
        &self,
        user: Option<UserId>,
        on_change: ChangeHandler,
    ) -> Result<Option<BootstrapReport>> {
        match user {
            Some(user_id) => self.sign_in(user_id, on_change).await.map(Some),
            None => {
                self.sign_out();
                Ok(None)
            }
        }
    }

    /// Follow an authentication state channel until its sender is dropped,
    /// then sign out.
    pub async fn drive_auth(
        &self,
        mut auth: watch::Receiver<Option<UserId>>,
        on_change: ChangeHandler,
    ) {
        loop {
            let user = auth.borrow_and_update().clone();
            if let Err(err) = self.on_auth_changed(user, on_change.clone()).await {
                error!(device = %self.config.device_name, %err, "sync start failed");
            }
            if auth.changed().await.is_err() {
                break;
            }
        }
        self.sign_out();
    }

    /// Merge `patch` into the local document and, when signed in, schedule
    /// the merged document for a remote write. Returns the merged document.
    pub fn save(&self, patch: Document) -> Result<Document> {
        let merged = self.local.save(patch)?;
        if let Some(session) = self.session() {
            session.schedule_if_hydrated(merged.clone());
        }
        Ok(merged)
    }

    /// Send the local document now instead of waiting for the debouncer.
    pub async fn flush(&self) -> Result<WriteOutcome> {
        let session = self.session().ok_or(SyncError::NotSignedIn)?;
        if session.hold_if_hydrating() {
            return Ok(WriteOutcome::Skipped(SkipReason::Hydrating));
        }
        session.cancel_pending();
        session.write_now(self.local.load()).await
    }

    /// Wrap `on_change` so remote documents are persisted locally first.
    /// Top-level sections are replaced, not merged; volatile fields are
    /// not stored.
    fn persisting_handler(&self, on_change: ChangeHandler) -> ChangeHandler {
        let local = self.local.clone();
        let device = self.config.device_name.clone();
        Arc::new(move |document: Document| {
            let sections: Document = document
                .iter()
                .filter(|(key, _)| !is_volatile(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            if let Err(err) = local.replace_sections(sections) {
                warn!(%device, %err, "failed to persist remote document locally");
            }
            on_change(document);
        })
    }
}

/// Convenience constructors backed by in-memory stores.
pub mod quick {
    use super::*;

    /// A client with an in-memory local store talking to `remote`.
    pub fn memory_client(
        remote: Arc<MemoryRemoteStore>,
        device_name: &str,
    ) -> SyncClient<MemoryRemoteStore, MemoryBackend> {
        memory_client_with(remote, device_name, SyncConfig::default())
    }

    pub fn memory_client_with(
        remote: Arc<MemoryRemoteStore>,
        device_name: &str,
        sync: SyncConfig,
    ) -> SyncClient<MemoryRemoteStore, MemoryBackend> {
        let local = Arc::new(LocalStore::new(Arc::new(MemoryBackend::new())));
        let config = ClientConfigBuilder::new()
            .device_name(device_name)
            .sync(sync)
            .build();
        SyncClient::new(remote, local, config)
    }

    /// Several devices sharing one remote store.
    pub fn memory_clients(
        remote: Arc<MemoryRemoteStore>,
        device_names: &[&str],
    ) -> Vec<SyncClient<MemoryRemoteStore, MemoryBackend>> {
        device_names
            .iter()
            .map(|name| memory_client(remote.clone(), name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, RemoteError};
    use crate::fingerprint::fingerprint;
    use lifeops_store::document_from_json;
    use serde_json::json;
    use std::time::Duration;

    fn noop() -> ChangeHandler {
        Arc::new(|_| {})
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfigBuilder::new()
            .device_name("phone")
            .sync(SyncConfig {
                debounce_ms: 10,
                ..Default::default()
            })
            .build();

        assert_eq!(config.device_name, "phone");
        assert_eq!(config.sync.debounce_ms, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_reuses_session_for_same_user() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let client = quick::memory_client(remote.clone(), "laptop");
        let user = UserId::new("alice");

        client.sign_in(user.clone(), noop()).await.unwrap();
        let first = client.session().unwrap();
        client.sign_in(user.clone(), noop()).await.unwrap();
        let second = client.session().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(remote.read_calls(), 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(remote.subscriber_count(&user), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_user_tears_down_previous_session() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let client = quick::memory_client(remote, "laptop");

        client.sign_in(UserId::new("alice"), noop()).await.unwrap();
        let alice = client.session().unwrap();
        client.sign_in(UserId::new("bob"), noop()).await.unwrap();

        assert!(!alice.is_active());
        assert_eq!(client.current_user(), Some(UserId::new("bob")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_keeps_local_data() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let client = quick::memory_client(remote, "laptop");

        client.sign_in(UserId::new("alice"), noop()).await.unwrap();
        client
            .save(document_from_json(json!({"tasksByDate": {"d": [1]}})))
            .unwrap();
        let session = client.session().unwrap();
        client.sign_out();

        assert!(!session.is_active());
        assert!(client.status().is_none());
        assert!(!client.load().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_while_signed_out_stays_local() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let client = quick::memory_client(remote.clone(), "laptop");

        client.save(document_from_json(json!({"a": 1}))).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(remote.write_calls(), 0);
        assert!(matches!(client.flush().await, Err(SyncError::NotSignedIn)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_change_none_signs_out() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let client = quick::memory_client(remote, "laptop");

        let report = client
            .on_auth_changed(Some(UserId::new("alice")), noop())
            .await
            .unwrap();
        assert!(report.is_some());

        let report = client.on_auth_changed(None, noop()).await.unwrap();
        assert!(report.is_none());
        assert!(client.current_user().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_change_persists_locally_without_volatile_fields() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let client = quick::memory_client(remote.clone(), "laptop");
        let user = UserId::new("alice");
        client
            .save(document_from_json(json!({"tasks": {"a": 1, "b": 2}, "notes": "x"})))
            .unwrap();
        client.sign_in(user.clone(), noop()).await.unwrap();

        remote.put_document(
            &user,
            document_from_json(json!({"tasks": {"a": 1}, "updatedAt": {"$serverTimestamp": 5}})),
        );
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            client.load(),
            document_from_json(json!({"tasks": {"a": 1}, "notes": "x"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_during_slow_sign_in_keeps_remote_sections() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let user = UserId::new("alice");
        remote.put_document(&user, document_from_json(json!({"tasks": ["new-from-phone"]})));
        remote.set_read_latency(Duration::from_secs(2));
        let client = Arc::new(quick::memory_client(remote.clone(), "laptop"));
        client
            .save(document_from_json(json!({"tasks": ["stale"]})))
            .unwrap();

        let signing_in = {
            let client = client.clone();
            let user = user.clone();
            tokio::spawn(async move { client.sign_in(user, noop()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        client
            .save(document_from_json(json!({"note": "call mum"})))
            .unwrap();

        let status = client.status().unwrap();
        assert!(!status.hydrated);
        assert!(!status.write_pending);
        assert!(matches!(
            client.flush().await.unwrap(),
            WriteOutcome::Skipped(SkipReason::Hydrating)
        ));

        signing_in.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let expected = document_from_json(json!({"tasks": ["new-from-phone"], "note": "call mum"}));
        assert_eq!(client.load(), expected);
        assert_eq!(
            fingerprint(&remote.document(&user).unwrap()),
            fingerprint(&expected)
        );
        assert_eq!(remote.write_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sign_in_leaves_client_signed_out() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let client = quick::memory_client(remote.clone(), "laptop");
        let user = UserId::new("alice");
        remote.fail_next_read(RemoteError::new(ErrorCode::PermissionDenied, "rules"));

        let err = client.sign_in(user.clone(), noop()).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert!(client.current_user().is_none());
        assert!(client.status().is_none());

        client
            .save(document_from_json(json!({"tasks": ["x"]})))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(remote.write_calls(), 0);
        assert_eq!(remote.subscriber_count(&user), 0);

        let report = client.sign_in(user.clone(), noop()).await.unwrap();
        assert!(report.migrated);
        assert_eq!(client.current_user(), Some(user));
    }
}
