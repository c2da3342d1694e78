//! History export download

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use beatdash_common::export::{export, ExportFormat};
use serde::Deserialize;

use super::parse_session_id;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// csv, json or txt
    pub format: Option<String>,
    /// Session id; the current session when absent
    pub session: Option<String>,
}

/// GET /api/track-history/export
///
/// Attachment named `track_history_<date>.<ext>`; 204 when the session has
/// no tracks.
pub async fn export_history(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format: ExportFormat = query.format.as_deref().unwrap_or("json").parse()?;

    let tracks = {
        let store = state.history.lock().await;
        let session = match query.session.as_deref() {
            Some(raw) => {
                let id = parse_session_id(raw)?;
                store
                    .get(id)
                    .ok_or_else(|| ApiError::NotFound(format!("session {} not found", id)))?
            }
            None => store.current(),
        };
        session.tracks().to_vec()
    };

    let Some(file) = export(&tracks, format, chrono::Local::now())? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    Ok((
        [
            (header::CONTENT_TYPE, file.mime_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.filename),
            ),
        ],
        file.content,
    )
        .into_response())
}
