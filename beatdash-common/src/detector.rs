//! Track-change detection
//!
//! Compares each polled snapshot against the last trackId seen per deck and
//! emits one [`Candidate`] per deck whose loaded track changed. The
//! last-known value is updated as soon as the candidate is emitted, whether
//! or not the reconciler later admits it, so a rejected change is never
//! re-emitted on the next poll.

use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{Candidate, ParamsSnapshot, TrackEvent, UNKNOWN};

#[derive(Debug, Default, Clone)]
pub struct TrackChangeDetector {
    last_seen: BTreeMap<u32, String>,
}

impl TrackChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prime last-known trackIds from the latest event per deck in `log`
    pub fn seed_from(&mut self, log: &[TrackEvent]) {
        for event in log {
            self.last_seen.insert(event.deck, event.track_id.clone());
        }
    }

    /// Last trackId recorded for `deck`
    pub fn last_seen(&self, deck: u32) -> Option<&str> {
        self.last_seen.get(&deck).map(String::as_str)
    }

    pub fn reset(&mut self) {
        self.last_seen.clear();
    }

    /// Produce candidates for every deck whose loaded track changed
    ///
    /// Decks without a loaded trackId are skipped for this cycle. Candidates
    /// come out in ascending deck order, stamped with `observed_at`.
    pub fn observe(&mut self, snapshot: &ParamsSnapshot, observed_at: i64) -> Vec<Candidate> {
        let mut decks: Vec<_> = snapshot.players.values().filter(|p| p.number > 0).collect();
        decks.sort_by_key(|p| p.number);

        let mut candidates = Vec::new();
        for player in decks {
            let Some(track) = player.track.as_ref() else {
                continue;
            };
            let Some(track_id) = track.id.as_deref() else {
                continue;
            };
            if self.last_seen(player.number) == Some(track_id) {
                continue;
            }

            debug!(deck = player.number, track_id, "Track change detected");
            self.last_seen.insert(player.number, track_id.to_string());

            let text = |v: &Option<String>| v.clone().unwrap_or_else(|| UNKNOWN.to_string());
            candidates.push(Candidate {
                timestamp: Some(observed_at),
                deck: player.number,
                track_id: track_id.to_string(),
                artist: text(&track.artist),
                title: text(&track.title),
                genre: text(&track.genre),
                key: text(&track.key),
                bpm: track.bpm.or(player.track_bpm),
                duration: track.duration,
            });
        }
        candidates
    }
}
