//! Event-wide actions and standings

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rallyx_sc::overrides::{self, EventMarked};
use rallyx_sc::standings::{self, Standing};
use rallyx_sc::store;
use serde::{Deserialize, Serialize};

use super::ApiResult;
use crate::AppState;

/// POST /api/events/:id/recalc
pub async fn recalc_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<EventMarked>)> {
    let marked = overrides::mark_event_dirty(&state.ctx, event_id).await?;
    Ok((StatusCode::ACCEPTED, Json(marked)))
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub event_id: i64,
    /// DNS runs added
    pub inserted: u64,
}

/// POST /api/events/:id/finalize
pub async fn finalize_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<FinalizeResponse>)> {
    let inserted = overrides::finalize_event(&state.ctx, event_id).await?;
    Ok((StatusCode::ACCEPTED, Json(FinalizeResponse { event_id, inserted })))
}

#[derive(Debug, Deserialize)]
pub struct StandingsQuery {
    pub class: Option<String>,
}

/// GET /api/events/:id/standings?class=SA
pub async fn standings(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Query(query): Query<StandingsQuery>,
) -> ApiResult<Json<Vec<Standing>>> {
    store::require_event(&state.ctx.db, event_id).await?;
    let ranked = standings::event_standings(&state.ctx.db, event_id, query.class.as_deref()).await?;
    Ok(Json(ranked))
}
