//! Reverse proxy to the deck metadata API
//!
//! Forwards the snapshot, artwork and waveform requests the dashboard makes
//! so it only ever talks to one origin.

use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn proxy_routes() -> Router<AppState> {
    Router::new()
        .route("/params.json", get(params))
        .route("/artwork/:player", get(artwork))
        .route("/wave-preview/:player", get(wave_preview))
        .route("/wave-detail/:player", get(wave_detail))
}

async fn params(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Response> {
    forward(&state, "/params.json", query).await
}

async fn artwork(
    State(state): State<AppState>,
    Path(player): Path<u32>,
    RawQuery(query): RawQuery,
) -> ApiResult<Response> {
    forward(&state, &format!("/artwork/{}", player), query).await
}

async fn wave_preview(
    State(state): State<AppState>,
    Path(player): Path<u32>,
    RawQuery(query): RawQuery,
) -> ApiResult<Response> {
    forward(&state, &format!("/wave-preview/{}", player), query).await
}

async fn wave_detail(
    State(state): State<AppState>,
    Path(player): Path<u32>,
    RawQuery(query): RawQuery,
) -> ApiResult<Response> {
    forward(&state, &format!("/wave-detail/{}", player), query).await
}

/// GET `path?query` on the metadata API and relay status, content type and body
async fn forward(state: &AppState, path: &str, query: Option<String>) -> ApiResult<Response> {
    let url = match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{}{}?{}", state.metadata_url, path, query),
        None => format!("{}{}", state.metadata_url, path),
    };
    debug!("Proxying {}", url);

    let upstream = state
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| ApiError::BadGateway(format!("metadata API unreachable: {}", e)))?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| HeaderValue::from_str(v).ok());
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| ApiError::BadGateway(format!("metadata API read failed: {}", e)))?;

    let mut response = (status, Body::from(bytes)).into_response();
    if let Some(content_type) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}
