//! HTTP API handlers for beatdash-server

pub mod analytics;
pub mod export;
pub mod health;
pub mod history;
pub mod metrics;
pub mod proxy;
pub mod sessions;
pub mod settings;
pub mod sse;

use uuid::Uuid;

use crate::error::ApiResult;

/// Parse a session id from a path or query parameter
pub(crate) fn parse_session_id(raw: &str) -> ApiResult<Uuid> {
    Ok(beatdash_common::uuid_utils::parse(raw)?)
}
