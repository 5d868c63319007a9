//! Recalculation triggers used after manual edits

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rallyx_common::db::EntityKind;
use rallyx_sc::propagator;
use serde::Serialize;

use super::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MarkedResponse {
    pub kind: EntityKind,
    pub id: i64,
}

/// POST /api/recalc/:kind/:id
pub async fn mark_entity_dirty(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
) -> ApiResult<(StatusCode, Json<MarkedResponse>)> {
    let kind: EntityKind = kind.parse()?;
    propagator::mark_dirty(&state.ctx.db, &state.ctx.recalc, kind, id).await?;
    Ok((StatusCode::ACCEPTED, Json(MarkedResponse { kind, id })))
}

/// POST /api/recalc/wake
pub async fn wake(State(state): State<AppState>) -> StatusCode {
    state.ctx.recalc.wake();
    StatusCode::ACCEPTED
}
