use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::config::PlatformInfo;
use crate::state::AppState;

/// Machine description shown by the control hub.
#[derive(Serialize)]
pub struct InfoResponse {
    #[serde(flatten)]
    pub platform: PlatformInfo,
    /// Name of the configured generation engine.
    pub engine: String,
    /// Always `"ready"` once the server is accepting requests.
    pub status: &'static str,
}

/// GET /info -- configured platform labels.
async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        platform: state.config.platform.clone(),
        engine: state.generation.engine_name().to_string(),
        status: "ready",
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/info", get(info))
}
