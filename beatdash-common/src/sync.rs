//! Two-phase mirroring of admitted events to an upstream history server
//!
//! A locally admitted event starts `Pending`. The upstream acknowledgement
//! either confirms it or rolls it back out of the local session. Transport
//! failures leave it pending for the next attempt.

use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::TrackEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Confirmed,
}

/// Upstream verdict for one submitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Added,
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub event: TrackEvent,
    pub status: EntryStatus,
    pub attempts: u32,
}

/// Events keyed by `(session id, timestamp)`
///
/// Timestamps are unique within a session log, so the pair identifies one
/// entry.
#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: BTreeMap<(Uuid, i64), LedgerEntry>,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tentative local append
    pub fn track(&mut self, session_id: Uuid, event: TrackEvent) {
        self.entries.insert(
            (session_id, event.timestamp),
            LedgerEntry {
                event,
                status: EntryStatus::Pending,
                attempts: 0,
            },
        );
    }

    /// Pending entries in admission order
    pub fn pending(&self) -> Vec<(Uuid, TrackEvent)> {
        let mut pending: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.status == EntryStatus::Pending)
            .map(|((session_id, _), entry)| (*session_id, entry.event.clone()))
            .collect();
        pending.sort_by_key(|(_, event)| event.timestamp);
        pending
    }

    pub fn status(&self, session_id: Uuid, timestamp: i64) -> Option<EntryStatus> {
        self.entries.get(&(session_id, timestamp)).map(|e| e.status)
    }

    /// Count a failed delivery; the entry stays pending
    pub fn record_attempt(&mut self, session_id: Uuid, timestamp: i64) {
        if let Some(entry) = self.entries.get_mut(&(session_id, timestamp)) {
            entry.attempts += 1;
        }
    }

    /// Apply an upstream verdict
    ///
    /// Returns the event to roll back locally when upstream rejected it.
    pub fn resolve(&mut self, session_id: Uuid, timestamp: i64, ack: Ack) -> Option<TrackEvent> {
        match ack {
            Ack::Added => {
                if let Some(entry) = self.entries.get_mut(&(session_id, timestamp)) {
                    entry.status = EntryStatus::Confirmed;
                }
                None
            }
            Ack::Rejected => self
                .entries
                .remove(&(session_id, timestamp))
                .map(|entry| entry.event),
        }
    }

    /// Forget every entry of a session (after a clear or delete)
    pub fn forget_session(&mut self, session_id: Uuid) {
        self.entries.retain(|(id, _), _| *id != session_id);
    }

    /// Drop confirmed entries; returns how many were removed
    pub fn prune_confirmed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.status == EntryStatus::Pending);
        before - self.entries.len()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.status == EntryStatus::Pending).count()
    }
}
