//! Next entrant queue

use axum::{extract::State, Json};
use rallyx_sc::entrants;
use serde::{Deserialize, Serialize};

use super::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct NextEntrant {
    /// Entry credited with the next start; `null` clears the queue
    pub entry_id: Option<i64>,
}

/// POST /api/next-entrant
pub async fn set_next_entrant(
    State(state): State<AppState>,
    Json(request): Json<NextEntrant>,
) -> ApiResult<Json<NextEntrant>> {
    entrants::set_next_entrant(&state.ctx, request.entry_id).await?;
    Ok(Json(request))
}
