use axum::routing::post;
use axum::Router;

use crate::handlers::command;
use crate::state::AppState;

/// Mount the control-hub command endpoint at the root.
pub fn router() -> Router<AppState> {
    Router::new().route("/command", post(command::handle_command))
}
