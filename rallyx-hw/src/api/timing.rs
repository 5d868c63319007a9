//! Manually injected timing events

use axum::{extract::State, Json};
use rallyx_common::events::TimingSource;
use rallyx_common::time::parse_time;
use rallyx_common::{Channel, TimingEvent};
use rallyx_sc::{record_timing_event, TimingOutcome};
use serde::Deserialize;

use super::{ApiError, ApiResult};
use crate::AppState;

/// Either `time_ms` or a clock string in `time` (`H:MM:SS.mmm`, ...)
#[derive(Debug, Deserialize)]
pub struct TimingRequest {
    /// Console channel label (`1`, `M2`, `03`, ...)
    pub channel: String,
    #[serde(default)]
    pub time_ms: Option<i64>,
    #[serde(default)]
    pub time: Option<String>,
}

impl TimingRequest {
    fn into_event(self) -> ApiResult<TimingEvent> {
        let time_ms = match (self.time_ms, self.time.as_deref()) {
            (Some(ms), None) => ms,
            (None, Some(text)) => parse_time(text)?
                .ok_or_else(|| ApiError::BadRequest("time is blank".to_string()))?,
            _ => {
                return Err(ApiError::BadRequest(
                    "exactly one of time_ms and time is required".to_string(),
                ))
            }
        };
        if time_ms <= 0 {
            return Err(ApiError::BadRequest("time must be positive".to_string()));
        }
        Ok(TimingEvent::new(
            Channel::from_label(&self.channel),
            time_ms,
            TimingSource::Manual,
        ))
    }
}

/// POST /api/timing
pub async fn record_timing(
    State(state): State<AppState>,
    Json(request): Json<TimingRequest>,
) -> ApiResult<Json<TimingOutcome>> {
    let event = request.into_event()?;
    Ok(Json(record_timing_event(&state.ctx, &event).await?))
}
