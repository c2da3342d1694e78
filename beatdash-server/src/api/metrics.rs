//! Metrics endpoints
//!
//! `GET /metrics` for the scraper, plus the POST endpoints the dashboard
//! uses to report its own view of history size, players and track changes.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistorySizeReport {
    pub size: usize,
}

#[derive(Debug, Deserialize)]
pub struct ActivePlayersReport {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct TrackChangeReport {
    pub player: u32,
}

/// GET /metrics
pub async fn render(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

/// POST /api/metrics/track-history-size
pub async fn report_history_size(
    State(state): State<AppState>,
    payload: Result<Json<HistorySizeReport>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(report) = payload?;
    state.metrics.set_track_history_size(report.size);
    Ok(Json(json!({ "success": true })))
}

/// POST /api/metrics/active-players
pub async fn report_active_players(
    State(state): State<AppState>,
    payload: Result<Json<ActivePlayersReport>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(report) = payload?;
    state.metrics.set_active_players(report.count);
    Ok(Json(json!({ "success": true })))
}

/// POST /api/metrics/track-change
pub async fn report_track_change(
    State(state): State<AppState>,
    payload: Result<Json<TrackChangeReport>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(report) = payload?;
    state.metrics.increment_track_changes(report.player);
    Ok(Json(json!({ "success": true })))
}
