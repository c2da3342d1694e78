//! beatdash-server library
//!
//! HTTP surface of the deck history dashboard: history and session APIs,
//! exports, analytics, SSE events, metrics, the metadata API proxy and the
//! built dashboard assets. The poller and upstream mirror run beside it.

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, patch, post},
    Router,
};
use beatdash_common::events::{BeatdashEvent, EventBus};
use beatdash_common::history::Admission;
use beatdash_common::settings::DashboardSettings;
use beatdash_common::storage::WriteBehind;
use beatdash_common::{Candidate, Reconciler, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub mod api;
pub mod error;
pub mod metrics;
pub mod mirror;
pub mod poller;

use metrics::Metrics;
use mirror::UpstreamMirror;

pub const DEFAULT_METADATA_URL: &str = "http://localhost:17081";

/// Timeout for requests to the metadata API and the upstream server
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared across HTTP handlers, the poller and the mirror
#[derive(Clone)]
pub struct AppState {
    /// Session store; the lock serializes check-then-append admission
    pub history: Arc<Mutex<SessionStore>>,
    pub reconciler: Reconciler,
    /// Current settings; the poller watches this for interval changes
    pub settings: Arc<watch::Sender<DashboardSettings>>,
    pub writer: Option<WriteBehind>,
    pub events: EventBus,
    pub metrics: Arc<Metrics>,
    pub http: reqwest::Client,
    pub metadata_url: String,
    pub mirror: Option<Arc<UpstreamMirror>>,
    pub static_dir: Option<PathBuf>,
    pub cors_origin: Option<String>,
}

impl AppState {
    pub fn new(store: SessionStore, reconciler: Reconciler, settings: DashboardSettings) -> Self {
        let (settings, _) = watch::channel(settings.normalize());
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        let metrics = Metrics::new();
        metrics.set_track_history_size(store.current().len());

        Self {
            history: Arc::new(Mutex::new(store)),
            reconciler,
            settings: Arc::new(settings),
            writer: None,
            events: EventBus::new(100),
            metrics: Arc::new(metrics),
            http,
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            mirror: None,
            static_dir: None,
            cors_origin: None,
        }
    }

    pub fn with_writer(mut self, writer: WriteBehind) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_mirror(mut self, mirror: Arc<UpstreamMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = Some(origin.into());
        self
    }

    pub fn current_settings(&self) -> DashboardSettings {
        self.settings.borrow().clone()
    }

    /// Admit a candidate into the current session
    ///
    /// Broadcasts the admission, updates the history gauge and hands the
    /// event to the upstream mirror when one is configured.
    pub async fn admit(&self, candidate: Candidate) -> beatdash_common::Result<Admission> {
        let mut store = self.history.lock().await;
        let session_id = store.current_id();
        let admission = self.reconciler.admit(&mut store, candidate)?;

        if let Admission::Admitted(event) = &admission {
            self.metrics.set_track_history_size(store.current().len());
            drop(store);

            self.events.emit_lossy(BeatdashEvent::TrackAdmitted {
                session_id,
                event: event.clone(),
            });
            if let Some(mirror) = &self.mirror {
                mirror.enqueue(session_id, event.clone()).await;
            }
        }
        Ok(admission)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/track-history",
            get(api::history::list)
                .post(api::history::submit)
                .delete(api::history::clear),
        )
        .route("/api/track-history/clean", patch(api::history::clean))
        .route("/api/track-history/export", get(api::export::export_history))
        .route(
            "/api/sessions",
            get(api::sessions::list).post(api::sessions::create),
        )
        .route("/api/sessions/current", get(api::sessions::current))
        .route(
            "/api/sessions/:id",
            patch(api::sessions::rename).delete(api::sessions::delete),
        )
        .route("/api/sessions/:id/switch", post(api::sessions::switch))
        .route(
            "/api/settings",
            get(api::settings::get_settings).put(api::settings::put_settings),
        )
        .route("/api/analytics", get(api::analytics::session_analytics))
        .route("/api/events", get(api::sse::event_stream))
        .route("/metrics", get(api::metrics::render))
        .route("/api/metrics/track-history-size", post(api::metrics::report_history_size))
        .route("/api/metrics/active-players", post(api::metrics::report_active_players))
        .route("/api/metrics/track-change", post(api::metrics::report_track_change))
        .merge(api::proxy::proxy_routes())
        .merge(api::health::health_routes());

    let mut router = api
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics::track_requests,
        ))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = state.cors_origin.as_deref().and_then(cors_layer) {
        router = router.layer(cors);
    }

    // Unknown paths fall back to the dashboard's index.html
    if let Some(dir) = &state.static_dir {
        let index = dir.join("index.html");
        router = router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }

    router.with_state(state)
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    match origin.parse::<HeaderValue>() {
        Ok(origin) => Some(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                ])
                .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]),
        ),
        Err(e) => {
            warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
            None
        }
    }
}
