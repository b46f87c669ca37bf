use axum::routing::get;
use axum::Router;

use crate::handlers::artifacts;
use crate::state::AppState;

/// Artifact downloads.
///
/// `/static/generated/{file}` is the path older control-hub clients use for
/// the same files.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/artifacts/{file}", get(artifacts::serve_artifact))
        .route("/static/generated/{file}", get(artifacts::serve_artifact))
}
