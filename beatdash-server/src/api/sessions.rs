//! Session management API

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use beatdash_common::events::BeatdashEvent;
use beatdash_common::models::SessionSummary;
use beatdash_common::Session;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::parse_session_id;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    pub current_session_id: Uuid,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameSessionRequest {
    pub name: String,
}

fn sessions_changed(state: &AppState, current_session_id: Uuid) {
    state
        .events
        .emit_lossy(BeatdashEvent::SessionsChanged { current_session_id });
}

/// GET /api/sessions
pub async fn list(State(state): State<AppState>) -> Json<SessionList> {
    let store = state.history.lock().await;
    Json(SessionList {
        current_session_id: store.current_id(),
        sessions: store.summaries(),
    })
}

/// GET /api/sessions/current
pub async fn current(State(state): State<AppState>) -> Json<Session> {
    let store = state.history.lock().await;
    Json(store.current().clone())
}

/// POST /api/sessions
///
/// The new session becomes current. An empty body creates a session with a
/// date-derived name.
pub async fn create(
    State(state): State<AppState>,
    payload: Option<Json<CreateSessionRequest>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();

    let mut store = state.history.lock().await;
    let id = store.create_session(request.name.as_deref());
    let summary = store.get(id).map(Session::summary);
    state.metrics.set_track_history_size(0);
    drop(store);

    sessions_changed(&state, id);
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "session": summary }))))
}

/// PATCH /api/sessions/:id
pub async fn rename(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RenameSessionRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let id = parse_session_id(&id)?;
    let Json(request) = payload?;

    let mut store = state.history.lock().await;
    store.rename_session(id, &request.name)?;
    let summary = store.get(id).map(Session::summary);
    let current = store.current_id();
    drop(store);

    sessions_changed(&state, current);
    Ok(Json(json!({ "success": true, "session": summary })))
}

/// DELETE /api/sessions/:id
///
/// 409 when it is the only session left.
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let id = parse_session_id(&id)?;

    let mut store = state.history.lock().await;
    store.delete_session(id)?;
    let current = store.current_id();
    state.metrics.set_track_history_size(store.current().len());
    drop(store);

    if let Some(mirror) = &state.mirror {
        mirror.forget_session(id).await;
    }
    sessions_changed(&state, current);
    Ok(Json(json!({ "success": true, "currentSessionId": current })))
}

/// POST /api/sessions/:id/switch
///
/// Unknown ids leave the current session as it is (`switched: false`).
pub async fn switch(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let id = parse_session_id(&id).map_err(|_| ApiError::BadRequest(format!("invalid session id '{}'", id)))?;

    let mut store = state.history.lock().await;
    let switched = store.switch_session(id);
    let current = store.current_id();
    state.metrics.set_track_history_size(store.current().len());
    drop(store);

    if switched {
        sessions_changed(&state, current);
    }
    Ok(Json(json!({
        "success": true,
        "switched": switched,
        "currentSessionId": current,
    })))
}
