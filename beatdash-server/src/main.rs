//! beatdash-server - deck history dashboard server
//!
//! Serves the dashboard and its APIs, polls the metadata API for deck
//! changes and records them into the current session.

use anyhow::{Context, Result};
use beatdash_common::config::{resolve_root_folder, BootstrapConfig};
use beatdash_common::events::EventBus;
use beatdash_common::settings::DashboardSettings;
use beatdash_common::storage::{KeyValueStore, MemoryStore, SqliteStore, WriteBehind};
use beatdash_common::time::{Clock, SystemClock};
use beatdash_common::{Reconciler, SessionStore};
use beatdash_server::mirror::UpstreamMirror;
use beatdash_server::poller::Poller;
use beatdash_server::{build_router, AppState};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "beatdash-server")]
#[command(about = "Deck history dashboard server", long_about = None)]
struct Args {
    /// HTTP port (overrides config file)
    #[arg(short, long, env = "BEATDASH_PORT")]
    port: Option<u16>,

    /// Root folder holding the database
    #[arg(short, long, env = "BEATDASH_ROOT")]
    root_folder: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, env = "BEATDASH_CONFIG")]
    config: Option<PathBuf>,

    /// Deck metadata API base URL (overrides config file)
    #[arg(long, env = "BEATDASH_METADATA_URL")]
    metadata_url: Option<String>,

    /// Built dashboard assets (overrides config file)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Keep all state in memory; nothing is written to disk
    #[arg(long)]
    ephemeral: bool,

    /// Do not poll the metadata API from the server
    #[arg(long)]
    no_poll: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = BootstrapConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let default_filter = format!(
        "beatdash_server={level},beatdash_common={level},tower_http={level}",
        level = config.logging.level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    // Build identification first, before any storage delay
    info!(
        "Starting beatdash-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let policy = config.history.admission_policy()?;
    info!("History admission policy: {:?}", policy);

    let kv: Arc<dyn KeyValueStore> = if args.ephemeral {
        info!("Ephemeral mode: state is kept in memory only");
        Arc::new(MemoryStore::new())
    } else {
        let root = resolve_root_folder(args.root_folder.as_deref(), &config);
        let db_path = config.database_path(&root);
        info!("Database path: {}", db_path.display());
        Arc::new(
            SqliteStore::open(&db_path)
                .await
                .with_context(|| format!("Failed to open database {}", db_path.display()))?,
        )
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::new(100);
    let (writer, _writer_task) = WriteBehind::spawn(
        kv.clone(),
        Duration::from_millis(config.persistence.debounce_ms),
        Some(events.clone()),
    );

    let store = SessionStore::load(kv.as_ref(), clock.clone())
        .await
        .context("Failed to load sessions")?
        .with_writer(writer.clone());
    let settings = DashboardSettings::load(kv.as_ref()).await?;
    info!("Polling interval: {}ms", settings.polling_interval);

    let metadata_url = args.metadata_url.unwrap_or(config.metadata_url.clone());
    let static_dir = args.static_dir.unwrap_or(config.static_dir.clone());

    let mut state = AppState::new(store, Reconciler::new(policy, clock), settings)
        .with_writer(writer.clone())
        .with_events(events)
        .with_metadata_url(metadata_url)
        .with_cors_origin(config.cors_origin.clone());

    if static_dir.join("index.html").exists() {
        info!("Serving dashboard from {}", static_dir.display());
        state = state.with_static_dir(static_dir);
    } else {
        warn!("No dashboard build at {}; serving the API only", static_dir.display());
    }

    if let Some(upstream) = &config.upstream_history {
        let mirror = Arc::new(UpstreamMirror::new(state.http.clone(), upstream));
        state = state.with_mirror(mirror.clone());
        tokio::spawn(mirror.run(state.clone()));
    }

    let poller = if args.no_poll {
        info!("Server-side polling disabled");
        None
    } else {
        Some(Poller::new(state.clone()).await.spawn())
    };

    let app = build_router(state);

    let port = args.port.unwrap_or(config.port);
    let addr: SocketAddr = format!("{}:{}", config.bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_address, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("beatdash-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(poller) = poller {
        poller.abort();
    }

    let report = writer.flush().await;
    info!("Flushed {} pending storage writes ({} failed)", report.written, report.failed);

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
