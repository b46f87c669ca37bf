//! `POST /command`: the control-hub remote-control contract.
//!
//! Unlike the `/api` routes, outcomes use the hub's
//! `{"success": bool, "message": ...}` envelope, and a busy worker is a 400.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use imagine_core::error::CoreError;
use imagine_core::validation::{validate_prompt, validate_steps, DEFAULT_STEPS};
use imagine_pipeline::registry::DEFAULT_MODE;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::state::AppState;

pub const CMD_START_GENERATION: &str = "start_generation";
pub const CMD_STOP_GENERATION: &str = "stop_generation";
pub const CMD_GET_STATUS: &str = "get_status";

/// Prompt used by `start_generation` when the hub sends none.
pub const DEFAULT_COMMAND_PROMPT: &str = "a beautiful landscape";

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct StartGenerationData {
    prompt: Option<String>,
    steps: Option<i64>,
    mode: Option<String>,
}

/// POST /command
pub async fn handle_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = payload?;
    tracing::info!(command = %request.command, "Control command received");

    let response = match request.command.as_str() {
        CMD_START_GENERATION => start_generation(&state, request.data),
        CMD_STOP_GENERATION => stop_generation(&state),
        CMD_GET_STATUS => Json(status_body(&state)).into_response(),
        other => failure(
            StatusCode::BAD_REQUEST,
            format!("Unknown command: {other}"),
        ),
    };
    Ok(response)
}

fn start_generation(state: &AppState, data: Value) -> Response {
    let data: StartGenerationData = if data.is_null() {
        StartGenerationData::default()
    } else {
        match serde_json::from_value(data) {
            Ok(data) => data,
            Err(e) => return failure(StatusCode::BAD_REQUEST, format!("Invalid data: {e}")),
        }
    };

    let submitted = validate_prompt(data.prompt.as_deref().unwrap_or(DEFAULT_COMMAND_PROMPT))
        .and_then(|prompt| {
            let steps = validate_steps(
                data.steps.unwrap_or(i64::from(DEFAULT_STEPS)),
                state.registry.max_steps(),
            )?;
            let mode = data.mode.as_deref().unwrap_or(DEFAULT_MODE);
            state.generation.submit_with_mode(&prompt, steps, mode)
        });

    match submitted {
        Ok(job_id) => Json(json!({
            "success": true,
            "job_id": job_id,
            "message": "Generation started",
        }))
        .into_response(),
        Err(CoreError::Busy { .. }) => failure(StatusCode::BAD_REQUEST, "Already running"),
        Err(CoreError::Validation(msg)) => failure(StatusCode::BAD_REQUEST, msg),
        Err(e) => {
            tracing::error!(error = %e, "start_generation failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Command failed")
        }
    }
}

fn stop_generation(state: &AppState) -> Response {
    match state.generation.cancel_active() {
        Ok(job_id) => Json(json!({
            "success": true,
            "job_id": job_id,
            "message": "Generation stopped",
        }))
        .into_response(),
        // The job finished between the lookup and the cancel.
        Err(CoreError::AlreadyTerminal { id, .. }) => Json(json!({
            "success": true,
            "job_id": id,
            "message": "Generation already finished",
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "stop_generation failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Command failed")
        }
    }
}

/// Latest snapshot, or `{"status":"idle"}` before the first job.
fn status_body(state: &AppState) -> Value {
    match state.registry.latest() {
        Some(snapshot) => json!(snapshot),
        None => json!({ "status": "idle" }),
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}
