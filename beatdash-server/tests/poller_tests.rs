//! Poller and upstream mirror tests against local HTTP servers

use axum::{extract::State, routing::get, Json, Router};
use beatdash_common::settings::DashboardSettings;
use beatdash_common::time::{Clock, ManualClock};
use beatdash_common::{AdmissionPolicy, Candidate, Error, Reconciler, SessionStore};
use beatdash_server::mirror::{SyncReport, UpstreamMirror};
use beatdash_server::poller::Poller;
use beatdash_server::{build_router, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

fn setup_state(clock: Arc<dyn Clock>) -> AppState {
    AppState::new(
        SessionStore::new(clock.clone()),
        Reconciler::new(AdmissionPolicy::default(), clock),
        DashboardSettings::default(),
    )
}

/// Serve `app` on an ephemeral local port
async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

type Snapshot = Arc<Mutex<Value>>;

/// Fake metadata API whose `/params.json` returns whatever the test stored
async fn fake_metadata_api(initial: Value) -> (SocketAddr, Snapshot) {
    async fn params(State(snapshot): State<Snapshot>) -> Json<Value> {
        Json(snapshot.lock().unwrap().clone())
    }

    let snapshot = Arc::new(Mutex::new(initial));
    let app = Router::new()
        .route("/params.json", get(params))
        .with_state(snapshot.clone());
    (serve(app).await, snapshot)
}

fn deck(number: u32, track_id: &str) -> Value {
    json!({
        "number": number,
        "is-playing": true,
        "track": { "id": track_id, "artist": "Artist", "title": format!("Title {}", track_id), "bpm": 124.0 }
    })
}

#[tokio::test]
async fn poll_admits_each_change_once() {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let (addr, snapshot) = fake_metadata_api(json!({ "players": { "1": deck(1, "A"), "2": { "number": 2 } } })).await;
    let state = setup_state(clock.clone()).with_metadata_url(format!("http://{}", addr));
    let mut poller = Poller::new(state.clone()).await;

    let outcome = poller.poll_once().await.unwrap();
    assert_eq!(outcome.players, 2);
    assert_eq!(outcome.admitted, 1);
    assert_eq!(state.metrics.active_players(), 2);

    // Unchanged deck state is not re-logged
    clock.advance(500);
    assert_eq!(poller.poll_once().await.unwrap().candidates, 0);

    *snapshot.lock().unwrap() = json!({ "players": { "1": deck(1, "B"), "2": deck(2, "C") } });
    clock.advance(500);
    let outcome = poller.poll_once().await.unwrap();
    assert_eq!(outcome.admitted, 2);

    let store = state.history.lock().await;
    let ids: Vec<&str> = store.current().tracks().iter().map(|e| e.track_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert_eq!(store.current().stats().avg_bpm, Some(124.0));
    assert_eq!(state.metrics.track_changes(1), 2);
    assert_eq!(state.metrics.track_history_size(), 3);
}

#[tokio::test]
async fn poller_seeded_from_existing_log() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_000_000));
    let (addr, _) = fake_metadata_api(json!({ "players": { "1": deck(1, "A") } })).await;
    let state = setup_state(clock).with_metadata_url(format!("http://{}", addr));
    state.admit(Candidate::new(1, "A")).await.unwrap();

    let mut poller = Poller::new(state.clone()).await;
    assert_eq!(poller.poll_once().await.unwrap().candidates, 0);
    assert_eq!(state.history.lock().await.current().len(), 1);
}

#[tokio::test]
async fn poll_failure_is_transient_fetch_error() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let state = setup_state(clock).with_metadata_url("http://127.0.0.1:1");
    let mut poller = Poller::new(state).await;

    let err = poller.poll_once().await.unwrap_err();
    assert!(matches!(err, Error::Fetch(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn mirror_confirms_and_rolls_back() {
    let upstream_clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_002_000));
    let upstream = setup_state(upstream_clock);
    // Upstream already holds deck 1 / A from another client
    upstream.admit(Candidate::new(1, "A").at(1_700_000_000_000)).await.unwrap();
    let upstream_addr = serve(build_router(upstream.clone())).await;

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_001_000));
    let local = setup_state(clock);
    let mirror = Arc::new(UpstreamMirror::new(
        local.http.clone(),
        &format!("http://{}/", upstream_addr),
    ));
    let local = local.with_mirror(mirror.clone());
    let mut events = local.events.subscribe();

    local.admit(Candidate::new(1, "A")).await.unwrap();
    local.admit(Candidate::new(2, "B")).await.unwrap();
    assert_eq!(mirror.pending_count().await, 2);

    let report = mirror.sync_pending(&local).await;
    assert_eq!(
        report,
        SyncReport {
            confirmed: 1,
            rolled_back: 1,
            failed: 0
        }
    );
    assert_eq!(mirror.pending_count().await, 0);

    let tracks: Vec<String> = local
        .history
        .lock()
        .await
        .current()
        .tracks()
        .iter()
        .map(|e| e.track_id.clone())
        .collect();
    assert_eq!(tracks, vec!["B".to_string()]);
    assert_eq!(upstream.history.lock().await.current().len(), 2);

    let mut rolled_back = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, beatdash_common::events::BeatdashEvent::EntryRolledBack { .. }) {
            rolled_back = true;
        }
    }
    assert!(rolled_back);
}

#[tokio::test]
async fn mirror_keeps_entries_pending_when_upstream_down() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let local = setup_state(clock);
    let mirror = Arc::new(UpstreamMirror::new(local.http.clone(), "http://127.0.0.1:1"));
    let local = local.with_mirror(mirror.clone());

    local.admit(Candidate::new(1, "A").at(10)).await.unwrap();
    let report = mirror.sync_pending(&local).await;
    assert_eq!(report.failed, 1);
    assert_eq!(mirror.pending_count().await, 1);
    assert_eq!(local.history.lock().await.current().len(), 1);
}
