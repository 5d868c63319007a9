//! Operator corrections to runs

use axum::{
    extract::{Path, State},
    Json,
};
use rallyx_common::db::Run;
use rallyx_sc::overrides::{self, RunEdit};

use super::ApiResult;
use crate::AppState;

/// PATCH /api/runs/:id
pub async fn edit_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Json(edit): Json<RunEdit>,
) -> ApiResult<Json<Run>> {
    Ok(Json(overrides::edit_run(&state.ctx, run_id, &edit).await?))
}

/// POST /api/runs/:id/dns
pub async fn force_dns(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<Run>> {
    Ok(Json(overrides::force_dns(&state.ctx, run_id).await?))
}

/// POST /api/runs/:id/dnf
pub async fn force_dnf(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<Run>> {
    Ok(Json(overrides::force_dnf(&state.ctx, run_id).await?))
}
