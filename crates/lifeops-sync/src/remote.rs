//! Remote document store abstractions.

use crate::error::RemoteError;
use async_trait::async_trait;
use lifeops_store::{deep_merge, Document};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Stable identifier of a signed-in user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change notification for a user's document.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteSnapshot {
    /// The full document after the change, or `None` if it does not exist.
    pub document: Option<Document>,
    /// True when the snapshot reflects a local write the backend has not
    /// committed yet.
    pub has_pending_writes: bool,
}

impl RemoteSnapshot {
    pub fn confirmed(document: Document) -> Self {
        Self {
            document: Some(document),
            has_pending_writes: false,
        }
    }

    pub fn pending(document: Document) -> Self {
        Self {
            document: Some(document),
            has_pending_writes: true,
        }
    }
}

/// Abstract remote document store: one document per user.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Read the user's document once.
    async fn get(&self, user_id: &UserId) -> Result<Option<Document>, RemoteError>;

    /// Merge `patch` into the user's document, creating it if needed.
    async fn merge_write(&self, user_id: &UserId, patch: Document) -> Result<(), RemoteError>;

    /// Subscribe to changes of the user's document. Dropping the receiver
    /// ends the subscription.
    fn subscribe(&self, user_id: &UserId) -> mpsc::UnboundedReceiver<RemoteSnapshot>;
}

/// A committed write, as recorded by [`MemoryRemoteStore`].
#[derive(Clone, Debug, PartialEq)]
pub struct WriteRecord {
    pub user_id: UserId,
    pub patch: Document,
}

type Subscribers = HashMap<UserId, Vec<mpsc::UnboundedSender<RemoteSnapshot>>>;

/// In-memory remote store for testing and simulation.
///
/// Behaves like a latency-compensated document database: each write first
/// emits a pending snapshot to subscribers, then (after the configured
/// latency) commits and emits a confirmed one. New subscribers immediately
/// receive the current document if it exists. Failures queued with
/// [`MemoryRemoteStore::fail_next_write`] reject writes before any snapshot
/// is emitted; [`MemoryRemoteStore::fail_next_read`] does the same for reads.
#[derive(Default)]
pub struct MemoryRemoteStore {
    documents: RwLock<HashMap<UserId, Document>>,
    subscribers: RwLock<Subscribers>,
    failures: Mutex<VecDeque<RemoteError>>,
    read_failures: Mutex<VecDeque<RemoteError>>,
    latency: RwLock<Duration>,
    read_latency: RwLock<Duration>,
    writes: RwLock<Vec<WriteRecord>>,
    write_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next write with `error`. Calls queue up in order.
    pub fn fail_next_write(&self, error: RemoteError) {
        self.failures.lock().push_back(error);
    }

    /// Reject the next read with `error`.
    pub fn fail_next_read(&self, error: RemoteError) {
        self.read_failures.lock().push_back(error);
    }

    /// Drop every queued failure, reads and writes alike.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
        self.read_failures.lock().clear();
    }

    /// Number of queued failures not yet consumed.
    pub fn pending_failures(&self) -> usize {
        self.failures.lock().len() + self.read_failures.lock().len()
    }

    /// Delay every write by `latency` before it commits.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Delay every read by `latency`. The document is read when the delay ends.
    pub fn set_read_latency(&self, latency: Duration) {
        *self.read_latency.write() = latency;
    }

    /// Current server-side document for `user_id`.
    pub fn document(&self, user_id: &UserId) -> Option<Document> {
        self.documents.read().get(user_id).cloned()
    }

    /// Replace the server-side document directly, as another backend client
    /// would. Subscribers receive a confirmed snapshot. Not recorded as a write.
    pub fn put_document(&self, user_id: &UserId, document: Document) {
        self.documents
            .write()
            .insert(user_id.clone(), document.clone());
        self.notify(user_id, RemoteSnapshot::confirmed(document));
    }

    /// Committed writes, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.read().clone()
    }

    /// Committed writes for one user.
    pub fn writes_for(&self, user_id: &UserId) -> Vec<WriteRecord> {
        self.writes
            .read()
            .iter()
            .filter(|w| &w.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Number of committed writes.
    pub fn write_count(&self) -> usize {
        self.writes.read().len()
    }

    /// Number of `merge_write` calls, including rejected ones.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Number of `get` calls.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions for `user_id`.
    pub fn subscriber_count(&self, user_id: &UserId) -> usize {
        let mut subscribers = self.subscribers.write();
        match subscribers.get_mut(user_id) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    fn notify(&self, user_id: &UserId, snapshot: RemoteSnapshot) {
        let mut subscribers = self.subscribers.write();
        if let Some(senders) = subscribers.get_mut(user_id) {
            senders.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<Document>, RemoteError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        let failure = self.read_failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let latency = *self.read_latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(self.document(user_id))
    }

    async fn merge_write(&self, user_id: &UserId, patch: Document) -> Result<(), RemoteError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        let failure = self.failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let mut preview = self.document(user_id).unwrap_or_default();
        deep_merge(&mut preview, patch.clone());
        self.notify(user_id, RemoteSnapshot::pending(preview));

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let committed = {
            let mut documents = self.documents.write();
            let doc = documents.entry(user_id.clone()).or_default();
            deep_merge(doc, patch.clone());
            doc.clone()
        };
        self.writes.write().push(WriteRecord {
            user_id: user_id.clone(),
            patch,
        });
        self.notify(user_id, RemoteSnapshot::confirmed(committed));
        Ok(())
    }

    fn subscribe(&self, user_id: &UserId) -> mpsc::UnboundedReceiver<RemoteSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(doc) = self.document(user_id) {
            let _ = tx.send(RemoteSnapshot::confirmed(doc));
        }
        self.subscribers
            .write()
            .entry(user_id.clone())
            .or_default()
            .push(tx);
        rx
    }
}
