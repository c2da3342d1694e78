//! History reconciliation
//!
//! Two dedup policies live here and must not be conflated:
//!
//! - **Real-time admission** ([`Reconciler::admit`]): a candidate is rejected
//!   only when the latest event for the same deck has the same trackId and is
//!   younger than the replay guard. Runs on every ingested candidate.
//! - **Batch clean** ([`clean`]): keep the first event per `(deck, trackId)`
//!   ever seen. Only runs on demand (maintenance, export, startup load), since
//!   applied during ingestion it would block every legitimate replay.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{Candidate, TrackEvent};
use crate::sessions::SessionStore;
use crate::time::{Clock, SystemClock};
use crate::{Error, Result};

/// Default replay guard window
pub const DEFAULT_REPLAY_GUARD_MS: i64 = 5_000;

/// How far ahead of the reconciler's clock an observed timestamp may be
pub const FUTURE_TOLERANCE_MS: i64 = 60_000;

/// Real-time admission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum AdmissionPolicy {
    /// Reject a repeat of the deck's latest track within `window_ms`
    ReplayGuard { window_ms: i64 },
    /// Reject any repeat of `(deck, trackId)` within the session
    SessionUnique,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        AdmissionPolicy::ReplayGuard {
            window_ms: DEFAULT_REPLAY_GUARD_MS,
        }
    }
}

/// Outcome of an admission attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Appended to the log with its final timestamp
    Admitted(TrackEvent),
    RejectedDuplicate,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Admission engine
#[derive(Clone)]
pub struct Reconciler {
    policy: AdmissionPolicy,
    clock: Arc<dyn Clock>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(AdmissionPolicy::default(), Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("policy", &self.policy).finish()
    }
}

impl Reconciler {
    pub fn new(policy: AdmissionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Decide whether `candidate` may join `log`, and with which timestamp
    ///
    /// Pure: `log` is not modified. The returned event's timestamp is the
    /// candidate's observed time (or "now"), raised to one past the log's
    /// last timestamp when it would otherwise collide or go backwards.
    pub fn evaluate(&self, log: &[TrackEvent], candidate: &Candidate) -> Admission {
        let observed = candidate.timestamp.unwrap_or_else(|| self.clock.now_ms());

        if self.is_duplicate(log, candidate, observed) {
            debug!(
                deck = candidate.deck,
                track_id = %candidate.track_id,
                "Rejected duplicate candidate"
            );
            return Admission::RejectedDuplicate;
        }

        let timestamp = match log.last() {
            Some(last) if observed <= last.timestamp => last.timestamp.saturating_add(1),
            _ => observed,
        };
        Admission::Admitted(candidate.clone().into_event(timestamp))
    }

    fn is_duplicate(&self, log: &[TrackEvent], candidate: &Candidate, observed: i64) -> bool {
        match self.policy {
            AdmissionPolicy::ReplayGuard { window_ms } => log
                .iter()
                .rev()
                .find(|e| e.deck == candidate.deck)
                .is_some_and(|prior| {
                    prior.track_id == candidate.track_id
                        && observed.saturating_sub(prior.timestamp) < window_ms
                }),
            AdmissionPolicy::SessionUnique => log
                .iter()
                .any(|e| e.deck == candidate.deck && e.track_id == candidate.track_id),
        }
    }

    /// Reject observed timestamps before the epoch or beyond the tolerance
    /// window ahead of "now"
    pub fn check_timestamp(&self, candidate: &Candidate) -> Result<()> {
        let Some(observed) = candidate.timestamp else {
            return Ok(());
        };
        let latest = self.clock.now_ms().saturating_add(FUTURE_TOLERANCE_MS);
        if !(0..=latest).contains(&observed) {
            return Err(Error::InvalidPayload(format!(
                "timestamp {} is outside [0, {}]",
                observed, latest
            )));
        }
        Ok(())
    }

    /// Admit `candidate` into the store's current session
    pub fn admit(&self, store: &mut SessionStore, candidate: Candidate) -> Result<Admission> {
        candidate.validate()?;
        self.check_timestamp(&candidate)?;
        let session_id = store.current().id;
        let admission = self.evaluate(store.current().tracks(), &candidate);
        if let Admission::Admitted(event) = &admission {
            store.append_track(session_id, event.clone())?;
            info!(
                deck = event.deck,
                track_id = %event.track_id,
                timestamp = event.timestamp,
                "Admitted track: {} - {}",
                event.artist,
                event.title
            );
        }
        Ok(admission)
    }
}

/// Batch clean: keep only the first event per `(deck, trackId)`
///
/// Events are visited in chronological order (stable for equal timestamps).
/// Idempotent: `clean(&clean(x)) == clean(x)`.
pub fn clean(tracks: &[TrackEvent]) -> Vec<TrackEvent> {
    let mut ordered: Vec<&TrackEvent> = tracks.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|e| seen.insert(e.play_key()))
        .cloned()
        .collect()
}
