use axum::extract::State;
use axum::{routing::get, Json, Router};
use imagine_core::types::JobId;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// The queued or running job, if any.
    pub active_job: Option<JobId>,
    /// Open push-channel connections.
    pub ws_connections: usize,
}

/// GET /health -- liveness plus a glimpse of the worker.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_job: state.registry.active_job(),
        ws_connections: state.ws_manager.connection_count().await,
    })
}

/// Mount health check routes (root level, not under `/api`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
