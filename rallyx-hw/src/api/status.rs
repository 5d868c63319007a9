//! Proxy status: registry state the front ends display

use axum::{extract::State, routing::get, Json, Router};
use rallyx_common::db::{registry, EntityKind};
use rallyx_sc::store;
use serde::Serialize;

use super::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    /// Desired address from the registry
    pub address: Option<String>,
    /// Last published link status (`Open`/`Closed`)
    pub status: Option<String>,
    /// Poller reported within the liveness window
    pub alive: bool,
}

#[derive(Debug, Serialize)]
pub struct PendingRecalc {
    pub runs: i64,
    pub entries: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active_event_id: Option<i64>,
    pub next_entry_id: Option<i64>,
    pub next_entry_msg: Option<String>,
    pub race_session: Option<String>,
    pub disable_start: bool,
    pub disable_finish: bool,
    /// Unix seconds of the last watchdog heartbeat
    pub hardware_watchdog: Option<i64>,
    pub devices: Vec<DeviceStatus>,
    pub pending: PendingRecalc,
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let db = &state.ctx.db;
    let alive = state.liveness.alive(state.liveness_timeout);

    let mut devices = Vec::with_capacity(state.devices.len());
    for name in state.devices.iter() {
        devices.push(DeviceStatus {
            name: name.clone(),
            address: registry::reg_get(db, &registry::device_address_key(name)).await?,
            status: registry::reg_get(db, &registry::device_status_key(name)).await?,
            alive: alive.contains(name),
        });
    }

    Ok(Json(StatusResponse {
        active_event_id: registry::reg_get_i64(db, registry::ACTIVE_EVENT_ID).await?,
        next_entry_id: registry::reg_get_i64(db, registry::NEXT_ENTRY_ID).await?,
        next_entry_msg: registry::reg_get(db, registry::NEXT_ENTRY_MSG).await?,
        race_session: registry::reg_get(db, registry::RACE_SESSION).await?,
        disable_start: registry::reg_get_flag(db, registry::DISABLE_START).await?,
        disable_finish: registry::reg_get_flag(db, registry::DISABLE_FINISH).await?,
        hardware_watchdog: registry::reg_get_i64(db, registry::HARDWARE_WATCHDOG).await?,
        devices,
        pending: PendingRecalc {
            runs: store::dirty_count(db, EntityKind::Run).await?,
            entries: store::dirty_count(db, EntityKind::Entry).await?,
        },
    }))
}

pub fn status_routes() -> Router<AppState> {
    Router::new().route("/status", get(get_status))
}
