//! Metadata API poller
//!
//! Fetches `/params.json` at the configured polling interval, feeds the
//! snapshot to the track-change detector and admits the resulting
//! candidates. Missed ticks are skipped, so at most one request is ever
//! outstanding. A settings change cancels the in-flight request and restarts
//! the cadence with the new interval.

use beatdash_common::detector::TrackChangeDetector;
use beatdash_common::events::BeatdashEvent;
use beatdash_common::models::ParamsSnapshot;
use beatdash_common::{Error, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::AppState;

/// What one poll cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub players: usize,
    pub candidates: usize,
    pub admitted: usize,
}

pub struct Poller {
    state: AppState,
    detector: TrackChangeDetector,
}

impl Poller {
    /// Poller whose detector is primed from the current session log
    pub async fn new(state: AppState) -> Self {
        let mut detector = TrackChangeDetector::new();
        detector.seed_from(state.history.lock().await.current().tracks());
        Self { state, detector }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll until the settings channel closes
    pub async fn run(mut self) {
        let mut settings_rx = self.state.settings.subscribe();

        loop {
            let period = settings_rx.borrow_and_update().polling_interval();
            info!("Polling {}/params.json every {:?}", self.state.metadata_url, period);

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tokio::select! {
                            result = self.poll_once() => self.report(result),
                            changed = settings_rx.changed() => {
                                if changed.is_err() {
                                    return;
                                }
                                debug!("Settings changed during poll; request cancelled");
                                break;
                            }
                        }
                    }
                    changed = settings_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }

    /// One fetch → detect → admit cycle
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let snapshot = fetch_snapshot(&self.state.http, &self.state.metadata_url).await?;
        self.state.metrics.set_active_players(snapshot.players.len());

        let observed_at = self.state.reconciler.now_ms();
        let candidates = self.detector.observe(&snapshot, observed_at);
        let mut outcome = PollOutcome {
            players: snapshot.players.len(),
            candidates: candidates.len(),
            admitted: 0,
        };

        for candidate in candidates {
            self.state.metrics.increment_track_changes(candidate.deck);
            match self.state.admit(candidate).await {
                Ok(admission) if admission.is_admitted() => outcome.admitted += 1,
                Ok(_) => {}
                // One bad deck entry must not drop the other decks' changes
                Err(e) => warn!("Skipping candidate: {}", e),
            }
        }
        Ok(outcome)
    }

    fn report(&self, result: Result<PollOutcome>) {
        match result {
            Ok(outcome) if outcome.admitted > 0 => {
                debug!(?outcome, "Poll admitted new tracks");
            }
            Ok(_) => {}
            Err(e) => {
                if e.is_transient() {
                    warn!("Poll failed, retrying next cycle: {}", e);
                } else {
                    error!("Poll failed: {}", e);
                }
                self.state.events.emit_lossy(BeatdashEvent::PollFailed {
                    message: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }
}

/// GET `<metadata_url>/params.json`
pub async fn fetch_snapshot(client: &reqwest::Client, metadata_url: &str) -> Result<ParamsSnapshot> {
    let url = format!("{}/params.json", metadata_url);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Fetch(format!("{}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::Fetch(format!("{} answered {}", url, response.status())));
    }

    let body = response
        .text()
        .await
        .map_err(|e| Error::Fetch(format!("{}: {}", url, e)))?;
    serde_json::from_str(&body).map_err(|e| Error::InvalidPayload(format!("snapshot: {}", e)))
}
