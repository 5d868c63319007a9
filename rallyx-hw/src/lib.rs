//! # RallyX Hardware Proxy (rallyx-hw)
//!
//! Talks to the timing hardware and hosts the scoring worker:
//! - One poller per device (timing console, RFID reader, barcode scanner)
//! - Watchdog heartbeat while every poller is alive
//! - Dispatcher feeding decoded events into the scoring core
//! - HTTP control surface for the administration and scoreboard front ends

use axum::Router;
use rallyx_common::config::TomlConfig;
use rallyx_sc::ScoringContext;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub mod api;
pub mod decoder;
pub mod dispatch;
pub mod link;
pub mod poller;
pub mod watchdog;

use decoder::{BarcodeDecoder, BarcodeFraming, ConsoleDecoder, TagDecoder};
use dispatch::EventSender;
use link::LinkOpener;
use poller::{Poller, PollerSettings};
use watchdog::Liveness;

/// Timing console device name
pub const TAG_HEUER: &str = "tag_heuer";
/// RFID tag reader device name
pub const RFID_READER: &str = "rfid_reader";
/// Barcode scanner device name
pub const BARCODE_SCANNER: &str = "barcode_scanner";

pub const KNOWN_DEVICES: [&str; 3] = [TAG_HEUER, RFID_READER, BARCODE_SCANNER];

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub ctx: ScoringContext,
    pub liveness: Liveness,
    /// Devices this process polls
    pub devices: Arc<Vec<String>>,
    pub liveness_timeout: Duration,
}

impl AppState {
    pub fn new(
        ctx: ScoringContext,
        liveness: Liveness,
        devices: Vec<String>,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            liveness,
            devices: Arc::new(devices),
            liveness_timeout,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, patch, post, put};

    let control = Router::new()
        .route("/api/timing", post(api::timing::record_timing))
        .route("/api/devices/:name/address", put(api::devices::set_address))
        .route("/api/recalc/wake", post(api::recalc::wake))
        .route("/api/recalc/:kind/:id", post(api::recalc::mark_entity_dirty))
        .route("/api/events/:id/recalc", post(api::events::recalc_event))
        .route("/api/events/:id/finalize", post(api::events::finalize_event))
        .route("/api/events/:id/standings", get(api::events::standings))
        .route("/api/next-entrant", post(api::entrants::set_next_entrant))
        .route("/api/runs/:id", patch(api::runs::edit_run))
        .route("/api/runs/:id/dns", post(api::runs::force_dns))
        .route("/api/runs/:id/dnf", post(api::runs::force_dnf));

    Router::new()
        .merge(control)
        .merge(api::health::health_routes())
        .merge(api::status::status_routes())
        .with_state(state)
}

/// Start a poller for every enabled device; returns the names started
pub fn spawn_pollers(
    tasks: &mut JoinSet<()>,
    config: &TomlConfig,
    db: &SqlitePool,
    opener: Arc<dyn LinkOpener>,
    events: &EventSender,
    liveness: &Liveness,
    cancel: &CancellationToken,
) -> Vec<String> {
    let settings = PollerSettings::from(&config.timing);
    let framing = if config.devices.barcode_idle_framing {
        BarcodeFraming::Idle
    } else {
        BarcodeFraming::Nul
    };

    let mut started = Vec::new();
    for name in &config.devices.enabled {
        let (db, opener, events, liveness) =
            (db.clone(), opener.clone(), events.clone(), liveness.clone());
        match name.as_str() {
            TAG_HEUER => {
                let poller = Poller::new(
                    name.as_str(),
                    db,
                    opener,
                    ConsoleDecoder::new(),
                    events,
                    liveness,
                    settings,
                );
                tasks.spawn(poller.run(cancel.clone()));
            }
            RFID_READER => {
                let poller = Poller::new(
                    name.as_str(),
                    db,
                    opener,
                    TagDecoder::new(),
                    events,
                    liveness,
                    settings,
                );
                tasks.spawn(poller.run(cancel.clone()));
            }
            BARCODE_SCANNER => {
                let poller = Poller::new(
                    name.as_str(),
                    db,
                    opener,
                    BarcodeDecoder::new(framing),
                    events,
                    liveness,
                    settings,
                );
                tasks.spawn(poller.run(cancel.clone()));
            }
            other => {
                warn!(device = %other, "Unknown device in configuration, not polled");
                continue;
            }
        }
        started.push(name.clone());
    }
    started
}
