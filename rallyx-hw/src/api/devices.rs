//! Device channel addresses

use axum::{
    extract::{Path, State},
    Json,
};
use rallyx_common::db::registry;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, ApiResult};
use crate::{AppState, KNOWN_DEVICES};

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    /// New address; `null` or blank closes the link
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub device: String,
    pub address: Option<String>,
}

/// PUT /api/devices/:name/address
///
/// The poller picks the change up on its next address poll.
pub async fn set_address(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<AddressRequest>,
) -> ApiResult<Json<AddressResponse>> {
    if !KNOWN_DEVICES.contains(&name.as_str()) {
        return Err(ApiError::NotFound(format!("device {}", name)));
    }

    let address = request
        .address
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    registry::reg_set(
        &state.ctx.db,
        &registry::device_address_key(&name),
        address.as_deref(),
    )
    .await?;
    info!(device = %name, address = ?address, "Device address set");

    Ok(Json(AddressResponse {
        device: name,
        address,
    }))
}
