//! Write-behind persistence
//!
//! Mutations enqueue `set`/`remove` operations without waiting. A background
//! task coalesces them per key and writes the batch once the debounce window
//! since the first queued change has elapsed, so bursts of mutations cost one
//! write per key. A failed write prunes low-priority keys and retries once;
//! a second failure is reported as a [`BeatdashEvent::StorageWarning`] and the
//! in-memory state stays authoritative.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{prune_low_priority, KeyValueStore};
use crate::events::{BeatdashEvent, EventBus};

enum Command {
    Set(String, String),
    Remove(String),
    Flush(oneshot::Sender<FlushReport>),
}

/// Result of writing one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

/// Handle to the write-behind task
///
/// Cloning is cheap; the task stops (after a final flush) once every handle
/// is dropped.
#[derive(Clone)]
pub struct WriteBehind {
    tx: mpsc::UnboundedSender<Command>,
}

impl WriteBehind {
    pub fn spawn(
        store: Arc<dyn KeyValueStore>,
        debounce: Duration,
        events: Option<EventBus>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store,
            events,
            pending: BTreeMap::new(),
        };
        let handle = tokio::spawn(worker.run(rx, debounce));
        (Self { tx }, handle)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        if self.tx.send(Command::Set(key.into(), value.into())).is_err() {
            warn!("Write-behind task stopped; dropping write");
        }
    }

    pub fn remove(&self, key: impl Into<String>) {
        if self.tx.send(Command::Remove(key.into())).is_err() {
            warn!("Write-behind task stopped; dropping remove");
        }
    }

    /// Write everything pending now and report the outcome
    pub async fn flush(&self) -> FlushReport {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).is_err() {
            return FlushReport::default();
        }
        ack_rx.await.unwrap_or_default()
    }
}

struct Worker {
    store: Arc<dyn KeyValueStore>,
    events: Option<EventBus>,
    /// `None` value means remove
    pending: BTreeMap<String, Option<String>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, debounce: Duration) {
        let mut deadline: Option<Instant> = None;

        loop {
            let command = match deadline {
                Some(at) => {
                    tokio::select! {
                        command = rx.recv() => command,
                        _ = tokio::time::sleep_until(at) => {
                            self.write_pending().await;
                            deadline = None;
                            continue;
                        }
                    }
                }
                None => rx.recv().await,
            };

            match command {
                Some(Command::Set(key, value)) => {
                    self.pending.insert(key, Some(value));
                    deadline.get_or_insert_with(|| Instant::now() + debounce);
                }
                Some(Command::Remove(key)) => {
                    self.pending.insert(key, None);
                    deadline.get_or_insert_with(|| Instant::now() + debounce);
                }
                Some(Command::Flush(ack)) => {
                    let report = self.write_pending().await;
                    deadline = None;
                    let _ = ack.send(report);
                }
                None => {
                    self.write_pending().await;
                    debug!("Write-behind task stopped");
                    break;
                }
            }
        }
    }

    async fn write_pending(&mut self) -> FlushReport {
        let batch = std::mem::take(&mut self.pending);
        let mut report = FlushReport::default();

        for (key, value) in batch {
            match self.write_with_retry(&key, value.as_deref()).await {
                Ok(()) => report.written += 1,
                Err(message) => {
                    report.failed += 1;
                    warn!("Storage write for '{}' failed after pruning: {}", key, message);
                    if let Some(events) = &self.events {
                        events.emit_lossy(BeatdashEvent::StorageWarning {
                            key,
                            message,
                            timestamp: crate::time::now(),
                        });
                    }
                }
            }
        }
        report
    }

    async fn write_with_retry(&self, key: &str, value: Option<&str>) -> Result<(), String> {
        match self.write_once(key, value).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("Storage write for '{}' failed ({}); pruning and retrying", key, first);
                prune_low_priority(self.store.as_ref()).await;
                self.write_once(key, value).await.map_err(|e| e.to_string())
            }
        }
    }

    async fn write_once(&self, key: &str, value: Option<&str>) -> crate::Result<()> {
        match value {
            Some(value) => self.store.set(key, value).await,
            None => self.store.remove(key).await,
        }
    }
}
