//! Dashboard settings API

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use beatdash_common::settings::DashboardSettings;
use tracing::info;

use crate::error::ApiResult;
use crate::AppState;

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<DashboardSettings> {
    Json(state.current_settings())
}

/// PUT /api/settings
///
/// Omitted fields take their defaults; a polling interval below the minimum
/// is raised to it. The poller picks up a new interval immediately; other
/// fields leave it undisturbed.
pub async fn put_settings(
    State(state): State<AppState>,
    payload: Result<Json<DashboardSettings>, JsonRejection>,
) -> ApiResult<Json<DashboardSettings>> {
    let Json(settings) = payload?;
    let settings = settings.normalize();

    if let Some(writer) = &state.writer {
        settings.save(writer)?;
    }
    // Only a new polling interval wakes the poller
    state.settings.send_if_modified(|current| {
        let previous = current.polling_interval;
        *current = settings.clone();
        if previous == settings.polling_interval {
            return false;
        }
        info!(
            "Polling interval changed from {}ms to {}ms",
            previous, settings.polling_interval
        );
        true
    });
    Ok(Json(settings))
}
