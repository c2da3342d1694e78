//! Upstream history mirror
//!
//! Forwards every locally admitted event to an authoritative beatdash server.
//! Local entries stay tentative until the upstream answer: `added: true`
//! confirms, `added: false` rolls the entry back out of the local session,
//! and transport failures leave it pending for the next cycle.

use beatdash_common::events::BeatdashEvent;
use beatdash_common::sync::{Ack, PendingLedger};
use beatdash_common::{Error, Result, TrackEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::history::SubmitResponse;
use crate::AppState;

/// Delay before pending entries are retried without new admissions
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub confirmed: usize,
    pub rolled_back: usize,
    pub failed: usize,
}

pub struct UpstreamMirror {
    client: reqwest::Client,
    endpoint: String,
    ledger: Mutex<PendingLedger>,
    notify: Notify,
}

impl UpstreamMirror {
    pub fn new(client: reqwest::Client, upstream_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/track-history", upstream_url.trim_end_matches('/')),
            ledger: Mutex::new(PendingLedger::new()),
            notify: Notify::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Hold `event` as pending and wake the sync task
    pub async fn enqueue(&self, session_id: Uuid, event: TrackEvent) {
        self.ledger.lock().await.track(session_id, event);
        self.notify.notify_one();
    }

    pub async fn forget_session(&self, session_id: Uuid) {
        self.ledger.lock().await.forget_session(session_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.ledger.lock().await.pending_count()
    }

    /// Sync loop: runs on every admission and every [`RETRY_INTERVAL`]
    pub async fn run(self: Arc<Self>, state: AppState) {
        info!("Mirroring admitted tracks to {}", self.endpoint);
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
            }
            self.sync_pending(&state).await;
        }
    }

    /// Submit every pending entry in admission order
    ///
    /// Stops at the first transport failure; the rest wait for the next
    /// cycle.
    pub async fn sync_pending(&self, state: &AppState) -> SyncReport {
        let pending = self.ledger.lock().await.pending();
        let mut report = SyncReport::default();

        for (session_id, event) in pending {
            let timestamp = event.timestamp;
            match self.submit(&event).await {
                Ok(Ack::Added) => {
                    self.ledger.lock().await.resolve(session_id, timestamp, Ack::Added);
                    report.confirmed += 1;
                }
                Ok(Ack::Rejected) => {
                    let rejected = self
                        .ledger
                        .lock()
                        .await
                        .resolve(session_id, timestamp, Ack::Rejected);
                    if rejected.is_some() {
                        roll_back(state, session_id, timestamp).await;
                        report.rolled_back += 1;
                    }
                }
                Err(e) => {
                    self.ledger.lock().await.record_attempt(session_id, timestamp);
                    warn!("Upstream history sync failed, will retry: {}", e);
                    report.failed += 1;
                    break;
                }
            }
        }

        self.ledger.lock().await.prune_confirmed();
        if report != SyncReport::default() {
            debug!(?report, "Upstream sync cycle finished");
        }
        report
    }

    async fn submit(&self, event: &TrackEvent) -> Result<Ack> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::Fetch(format!("upstream answered {}", status)));
        }
        if status.is_client_error() {
            // Upstream refuses the payload; retrying would not change that
            return Ok(Ack::Rejected);
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("unreadable upstream response: {}", e)))?;
        Ok(if body.added { Ack::Added } else { Ack::Rejected })
    }
}

async fn roll_back(state: &AppState, session_id: Uuid, timestamp: i64) {
    let mut store = state.history.lock().await;
    match store.remove_track(session_id, timestamp) {
        Ok(true) => {
            info!(session_id = %session_id, timestamp, "Rolled back entry refused upstream");
            if store.current_id() == session_id {
                state.metrics.set_track_history_size(store.current().len());
            }
            drop(store);
            state.events.emit_lossy(BeatdashEvent::EntryRolledBack { session_id, timestamp });
        }
        Ok(false) => debug!(timestamp, "Rolled-back entry already gone"),
        Err(e) => debug!("Rollback skipped: {}", e),
    }
}
