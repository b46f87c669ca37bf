use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::telemetry::TelemetrySample;

/// GET /api/telemetry
///
/// The most recent host sample; one is taken on demand before the first
/// periodic sample exists.
pub async fn latest(State(state): State<AppState>) -> AppResult<Json<TelemetrySample>> {
    if let Some(sample) = state.telemetry.latest() {
        return Ok(Json(sample));
    }
    let monitor = Arc::clone(&state.telemetry);
    let sample = tokio::task::spawn_blocking(move || monitor.sample())
        .await
        .map_err(|e| AppError::InternalError(format!("telemetry sampling failed: {e}")))?;
    Ok(Json(sample))
}
