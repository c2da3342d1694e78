//! Track history API
//!
//! Works on the current session. Listing returns the raw log; the clean pass
//! only runs when asked for through `PATCH /api/track-history/clean`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use beatdash_common::events::BeatdashEvent;
use beatdash_common::history::Admission;
use beatdash_common::{Candidate, TrackEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiResult;
use crate::AppState;

/// Response to a submitted candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub added: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The stored event, with its final timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<TrackEvent>,
}

/// GET /api/track-history
pub async fn list(State(state): State<AppState>) -> Json<Vec<TrackEvent>> {
    let store = state.history.lock().await;
    Json(store.current().tracks().to_vec())
}

/// POST /api/track-history
///
/// 201 when admitted, 200 with `added: false` for a duplicate.
pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<Candidate>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(candidate) = payload?;

    let response = match state.admit(candidate).await? {
        Admission::Admitted(event) => (
            StatusCode::CREATED,
            SubmitResponse {
                success: true,
                added: true,
                reason: None,
                event: Some(event),
            },
        ),
        Admission::RejectedDuplicate => (
            StatusCode::OK,
            SubmitResponse {
                success: true,
                added: false,
                reason: Some("duplicate".to_string()),
                event: None,
            },
        ),
    };
    Ok((response.0, Json(response.1)))
}

/// DELETE /api/track-history
pub async fn clear(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut store = state.history.lock().await;
    let session_id = store.current_id();
    let removed = store.clear_session(session_id)?;
    drop(store);

    info!(session_id = %session_id, "Cleared {} history entries", removed);
    state.metrics.set_track_history_size(0);
    if let Some(mirror) = &state.mirror {
        mirror.forget_session(session_id).await;
    }
    state.events.emit_lossy(BeatdashEvent::HistoryCleared { session_id });

    Ok(Json(json!({ "success": true, "removed": removed })))
}

/// PATCH /api/track-history/clean
pub async fn clean(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut store = state.history.lock().await;
    let session_id = store.current_id();
    let removed = store.clean_session(session_id)?;
    let remaining = store.current().len();
    drop(store);

    info!(session_id = %session_id, "Clean pass removed {} entries, {} remain", removed, remaining);
    state.metrics.set_track_history_size(remaining);
    state.events.emit_lossy(BeatdashEvent::HistoryCleaned {
        session_id,
        removed,
        remaining,
    });

    Ok(Json(json!({ "success": true, "removed": removed, "remaining": remaining })))
}
