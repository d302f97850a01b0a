//! Debounced write scheduling.
//!
//! A background worker holds at most one pending document. Each new
//! schedule call replaces it and restarts the quiet period; when the period
//! elapses the document goes to the sync gate.

use crate::gate::SyncGate;
use crate::remote::RemoteStore;
use lifeops_store::Document;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

enum Command {
    Schedule {
        seq: u64,
        document: Document,
        delay: Duration,
    },
    Cancel {
        upto: u64,
    },
}

struct Pending {
    seq: u64,
    document: Document,
    deadline: Instant,
}

/// Handle to a session's debounce worker.
pub struct WriteScheduler {
    tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    scheduled: AtomicU64,
    settled: Arc<AtomicU64>,
}

impl WriteScheduler {
    /// Spawn the worker feeding `gate`.
    pub(crate) fn spawn<R: RemoteStore>(gate: Arc<SyncGate<R>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let settled = Arc::new(AtomicU64::new(0));
        tokio::spawn(run_worker(gate, rx, settled.clone()));

        Self {
            tx: Mutex::new(Some(tx)),
            scheduled: AtomicU64::new(0),
            settled,
        }
    }

    /// Replace the pending document and restart the timer. Returns false
    /// after shutdown.
    pub fn schedule(&self, document: Document, delay: Duration) -> bool {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return false;
        };
        let seq = self.scheduled.fetch_add(1, Ordering::SeqCst) + 1;
        tx.send(Command::Schedule {
            seq,
            document,
            delay,
        })
        .is_ok()
    }

    /// Drop the pending document, if any.
    pub fn cancel(&self) {
        let upto = self.scheduled.load(Ordering::SeqCst);
        self.settled.fetch_max(upto, Ordering::SeqCst);
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Command::Cancel { upto });
        }
    }

    /// Cancel and stop the worker. Later schedule calls are ignored.
    pub fn shutdown(&self) {
        self.cancel();
        self.tx.lock().take();
    }

    /// True while a scheduled document has not yet been handed to the gate.
    pub fn has_pending(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst) > self.settled.load(Ordering::SeqCst)
    }
}

async fn run_worker<R: RemoteStore>(
    gate: Arc<SyncGate<R>>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    settled: Arc<AtomicU64>,
) {
    let mut pending: Option<Pending> = None;

    loop {
        let deadline = pending.as_ref().map(|p| p.deadline);
        let command = match deadline {
            None => rx.recv().await,
            Some(deadline) => {
                tokio::select! {
                    command = rx.recv() => command,
                    _ = tokio::time::sleep_until(deadline) => {
                        if let Some(due) = pending.take() {
                            settled.fetch_max(due.seq, Ordering::SeqCst);
                            fire(&gate, due.document).await;
                        }
                        continue;
                    }
                }
            }
        };

        match command {
            Some(Command::Schedule {
                seq,
                document,
                delay,
            }) => {
                if pending.is_some() {
                    debug!("debounced write superseded");
                }
                pending = Some(Pending {
                    seq,
                    document,
                    deadline: Instant::now() + delay,
                });
            }
            Some(Command::Cancel { upto }) => {
                if pending.as_ref().is_some_and(|p| p.seq <= upto) {
                    debug!("debounced write cancelled");
                    pending = None;
                }
            }
            None => break,
        }
    }
}

async fn fire<R: RemoteStore>(gate: &SyncGate<R>, document: Document) {
    match gate.submit(document).await {
        Ok(outcome) => debug!(?outcome, "debounced write finished"),
        Err(err) => error!(%err, "debounced write failed"),
    }
}
