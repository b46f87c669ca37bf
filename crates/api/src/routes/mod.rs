pub mod artifacts;
pub mod command;
pub mod health;
pub mod info;
pub mod jobs;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{generation, telemetry};
use crate::state::AppState;
use crate::ws;

/// Build the `/api` route tree.
///
/// ```text
/// POST   /generate            -> submit a job (202 {job_id})
/// GET    /status[?job_id=]    -> snapshot of a job, or of the latest one
/// GET    /telemetry           -> latest host CPU / memory sample
///
/// /jobs                       list, get, cancel (see routes::jobs)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generation::generate))
        .route("/status", get(generation::status))
        .route("/telemetry", get(telemetry::latest))
        .nest("/jobs", jobs::router())
}

/// The push channel, mounted at the root as `/ws`.
pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws", get(ws::ws_handler))
}
