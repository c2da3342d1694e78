//! Event system for beatdash
//!
//! Domain events are broadcast through [`EventBus`] and serialized for the
//! SSE stream the dashboard listens to.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::TrackEvent;

/// Beatdash event types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum BeatdashEvent {
    /// A candidate was admitted into a session log
    TrackAdmitted {
        session_id: Uuid,
        event: TrackEvent,
    },

    /// A session's log was reset
    HistoryCleared { session_id: Uuid },

    /// Batch clean pass finished
    HistoryCleaned {
        session_id: Uuid,
        removed: usize,
        remaining: usize,
    },

    /// Session set or current-session pointer changed
    SessionsChanged { current_session_id: Uuid },

    /// A tentative entry was refused upstream and removed locally
    EntryRolledBack {
        session_id: Uuid,
        timestamp: i64,
    },

    /// Poll of the metadata API failed; retried next cycle
    PollFailed {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Persistence write failed after pruning and retry
    StorageWarning {
        key: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl BeatdashEvent {
    /// SSE `event:` field value
    pub fn event_type(&self) -> &'static str {
        match self {
            BeatdashEvent::TrackAdmitted { .. } => "TrackAdmitted",
            BeatdashEvent::HistoryCleared { .. } => "HistoryCleared",
            BeatdashEvent::HistoryCleaned { .. } => "HistoryCleaned",
            BeatdashEvent::SessionsChanged { .. } => "SessionsChanged",
            BeatdashEvent::EntryRolledBack { .. } => "EntryRolledBack",
            BeatdashEvent::PollFailed { .. } => "PollFailed",
            BeatdashEvent::StorageWarning { .. } => "StorageWarning",
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks, slow subscribers
/// observe lag instead of stalling producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BeatdashEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BeatdashEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: BeatdashEvent,
    ) -> Result<usize, broadcast::error::SendError<BeatdashEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BeatdashEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
