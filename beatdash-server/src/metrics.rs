//! Prometheus-style metrics
//!
//! Counters and gauges are kept in process and rendered in the Prometheus
//! text exposition format on `GET /metrics`.

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::AppState;

/// Upper bounds (seconds) of the request duration histogram
pub const DURATION_BUCKETS: [f64; 9] = [0.1, 0.3, 0.5, 0.7, 1.0, 3.0, 5.0, 7.0, 10.0];

#[derive(Debug, Clone, Default)]
struct Histogram {
    /// Per-bucket counts, not cumulative
    buckets: [u64; DURATION_BUCKETS.len()],
    sum: f64,
    count: u64,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        if let Some(i) = DURATION_BUCKETS.iter().position(|le| value <= *le) {
            self.buckets[i] += 1;
        }
        self.sum += value;
        self.count += 1;
    }
}

type Labels = (String, u16);

#[derive(Debug, Default)]
pub struct Metrics {
    requests: Mutex<BTreeMap<Labels, u64>>,
    durations: Mutex<BTreeMap<Labels, Histogram>>,
    track_changes: Mutex<BTreeMap<String, u64>>,
    track_history_size: AtomicI64,
    active_players: AtomicI64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, endpoint: &str, status: u16, seconds: f64) {
        let labels = (endpoint.to_string(), status);
        *lock(&self.requests).entry(labels.clone()).or_insert(0) += 1;
        lock(&self.durations).entry(labels).or_default().observe(seconds);
    }

    pub fn set_track_history_size(&self, size: usize) {
        self.track_history_size.store(size as i64, Ordering::Relaxed);
    }

    pub fn set_active_players(&self, count: usize) {
        self.active_players.store(count as i64, Ordering::Relaxed);
    }

    pub fn increment_track_changes(&self, player: u32) {
        *lock(&self.track_changes).entry(player.to_string()).or_insert(0) += 1;
    }

    pub fn track_history_size(&self) -> i64 {
        self.track_history_size.load(Ordering::Relaxed)
    }

    pub fn active_players(&self) -> i64 {
        self.active_players.load(Ordering::Relaxed)
    }

    pub fn track_changes(&self, player: u32) -> u64 {
        lock(&self.track_changes).get(&player.to_string()).copied().unwrap_or(0)
    }

    /// Text exposition format, version 0.0.4
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP api_requests_total Total number of API requests\n");
        out.push_str("# TYPE api_requests_total counter\n");
        for ((endpoint, status), count) in lock(&self.requests).iter() {
            let _ = writeln!(
                out,
                "api_requests_total{{endpoint=\"{}\",status=\"{}\"}} {}",
                escape(endpoint),
                status,
                count
            );
        }

        out.push_str("# HELP api_request_duration_seconds Duration of API requests in seconds\n");
        out.push_str("# TYPE api_request_duration_seconds histogram\n");
        for ((endpoint, status), histogram) in lock(&self.durations).iter() {
            let labels = format!("endpoint=\"{}\",status=\"{}\"", escape(endpoint), status);
            let mut cumulative = 0;
            for (le, count) in DURATION_BUCKETS.iter().zip(histogram.buckets.iter()) {
                cumulative += count;
                let _ = writeln!(
                    out,
                    "api_request_duration_seconds_bucket{{le=\"{}\",{}}} {}",
                    le, labels, cumulative
                );
            }
            let _ = writeln!(
                out,
                "api_request_duration_seconds_bucket{{le=\"+Inf\",{}}} {}",
                labels, histogram.count
            );
            let _ = writeln!(out, "api_request_duration_seconds_sum{{{}}} {}", labels, histogram.sum);
            let _ = writeln!(out, "api_request_duration_seconds_count{{{}}} {}", labels, histogram.count);
        }

        out.push_str("# HELP track_history_size Number of tracks in the history\n");
        out.push_str("# TYPE track_history_size gauge\n");
        let _ = writeln!(out, "track_history_size {}", self.track_history_size());

        out.push_str("# HELP active_players Number of active players connected\n");
        out.push_str("# TYPE active_players gauge\n");
        let _ = writeln!(out, "active_players {}", self.active_players());

        out.push_str("# HELP track_changes_total Total number of track changes\n");
        out.push_str("# TYPE track_changes_total counter\n");
        for (player, count) in lock(&self.track_changes).iter() {
            let _ = writeln!(out, "track_changes_total{{player=\"{}\"}} {}", escape(player), count);
        }

        out
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Request counting and timing middleware
///
/// Labels use the matched route template so path parameters do not explode
/// the label space.
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    state.metrics.record_request(
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let metrics = Metrics::new();
        metrics.record_request("/api/track-history", 200, 0.05);
        metrics.record_request("/api/track-history", 200, 0.4);
        metrics.record_request("/api/track-history", 200, 30.0);

        let text = metrics.render();
        assert!(text.contains("api_requests_total{endpoint=\"/api/track-history\",status=\"200\"} 3"));
        assert!(text.contains(
            "api_request_duration_seconds_bucket{le=\"0.1\",endpoint=\"/api/track-history\",status=\"200\"} 1"
        ));
        assert!(text.contains(
            "api_request_duration_seconds_bucket{le=\"0.5\",endpoint=\"/api/track-history\",status=\"200\"} 2"
        ));
        assert!(text.contains(
            "api_request_duration_seconds_bucket{le=\"+Inf\",endpoint=\"/api/track-history\",status=\"200\"} 3"
        ));
    }

    #[test]
    fn test_gauges_and_track_changes() {
        let metrics = Metrics::new();
        metrics.set_track_history_size(12);
        metrics.set_active_players(2);
        metrics.increment_track_changes(1);
        metrics.increment_track_changes(1);

        let text = metrics.render();
        assert!(text.contains("track_history_size 12\n"));
        assert!(text.contains("active_players 2\n"));
        assert!(text.contains("track_changes_total{player=\"1\"} 2\n"));
        assert_eq!(metrics.track_changes(1), 2);
        assert_eq!(metrics.track_changes(3), 0);
    }
}
