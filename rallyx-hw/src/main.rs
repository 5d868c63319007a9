//! RallyX hardware proxy (rallyx-hw) - Main entry point
//!
//! Runs, in one process: a poller per enabled device, the watchdog, the
//! hardware event dispatcher, the recalculation worker and the HTTP control
//! surface. All of them share only the scoring database.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rallyx_common::config::load_config;
use rallyx_common::db::init_database;
use rallyx_hw::dispatch::{event_channel, Dispatcher};
use rallyx_hw::link::SystemLinkOpener;
use rallyx_hw::watchdog::{Liveness, Watchdog};
use rallyx_hw::{build_router, spawn_pollers, AppState};
use rallyx_sc::{propagator, Annunciator, LogAnnunciator, ScoringContext, SoundAnnunciator};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Command-line arguments for rallyx-hw
#[derive(Parser, Debug)]
#[command(name = "rallyx-hw")]
#[command(about = "RallyX timing hardware proxy and scoring worker")]
#[command(version)]
struct Args {
    /// Bootstrap configuration file
    #[arg(short, long, env = "RALLYX_CONFIG")]
    config: Option<PathBuf>,

    /// Scoring database (overrides the configured path)
    #[arg(short, long, env = "RALLYX_DATABASE")]
    database: Option<PathBuf>,

    /// Control API port (overrides the configured port)
    #[arg(short, long, env = "RALLYX_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting RallyX hardware proxy (rallyx-hw) v{}", env!("CARGO_PKG_VERSION"));

    let db_path = args.database.unwrap_or_else(|| config.database_path.clone());
    info!("Database path: {}", db_path.display());
    // A schema version mismatch stops startup here
    let db = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let rules = Arc::new(config.rules.clone());
    let (recalc, worker) = propagator::channel(
        db.clone(),
        rules.clone(),
        Duration::from_secs(config.recalc.sweep_interval_secs),
    );
    tasks.spawn(worker.run(cancel.clone()));

    let annunciator: Arc<dyn Annunciator> = match &config.sounds.directory {
        Some(dir) => {
            info!("Alert sounds from {}", dir.display());
            Arc::new(SoundAnnunciator::new(dir.clone()))
        }
        None => Arc::new(LogAnnunciator),
    };
    let ctx = ScoringContext::new(db.clone(), rules, recalc, annunciator);

    let (events, events_rx) = event_channel();
    let dispatcher = Dispatcher::new(
        ctx.clone(),
        Duration::from_millis(config.timing.tag_repeat_ms),
    );
    tasks.spawn(dispatcher.run(events_rx, cancel.clone()));

    let liveness = Liveness::new();
    let pollers = spawn_pollers(
        &mut tasks,
        &config,
        &db,
        Arc::new(SystemLinkOpener),
        &events,
        &liveness,
        &cancel,
    );
    // The dispatcher stops once every poller's sender is gone
    drop(events);
    info!(devices = ?pollers, "Pollers started");

    let liveness_timeout = Duration::from_millis(config.timing.liveness_timeout_ms);
    let watchdog = Watchdog::new(
        db.clone(),
        liveness.clone(),
        pollers.clone(),
        Duration::from_millis(config.timing.watchdog_interval_ms),
        liveness_timeout,
    );
    tasks.spawn(watchdog.run(cancel.clone()));

    let state = AppState::new(ctx, liveness, pollers, liveness_timeout);
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let port = args.port.unwrap_or(config.http_port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("rallyx-hw listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Background task ended abnormally: {}", e);
        }
    }
    db.close().await;

    served.context("Server error")?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM, or when something else cancels
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
