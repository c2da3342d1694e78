//! Session analytics endpoint

use axum::{
    extract::{Query, State},
    Json,
};
use beatdash_common::analytics::{analyze, SessionAnalytics};
use serde::Deserialize;

use super::parse_session_id;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub session: Option<String>,
}

/// GET /api/analytics
///
/// Computed over the raw log so replays count as plays.
pub async fn session_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<SessionAnalytics>> {
    let session_id = query.session.as_deref().map(parse_session_id).transpose()?;

    let store = state.history.lock().await;
    let session = match session_id {
        Some(id) => store
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("session {} not found", id)))?,
        None => store.current(),
    };
    Ok(Json(analyze(session.tracks())))
}
