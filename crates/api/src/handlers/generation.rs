//! Handlers for job submission and the job resource.
//!
//! Job ids arrive as raw strings and go through
//! [`parse_job_id`](imagine_core::types::parse_job_id), so a malformed id is
//! reported the same way as an unknown one.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use imagine_core::types::{parse_job_id, JobId};
use imagine_core::validation::{validate_prompt, validate_steps, DEFAULT_STEPS, MAX_PROMPT_LEN};
use imagine_pipeline::registry::DEFAULT_MODE;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::error::AppResult;
use crate::query::{JobListParams, StatusParams};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// `validator` length bounds are `u64`.
const PROMPT_MAX_CHARS: u64 = MAX_PROMPT_LEN as u64;

/// Body of `POST /api/generate`.
///
/// Shape checks live here; the step ceiling is configurable and is
/// enforced by [`validate_steps`].
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1, max = PROMPT_MAX_CHARS))]
    pub prompt: String,
    #[validate(range(min = 1))]
    pub steps: Option<i64>,
    #[validate(length(min = 1, max = 32))]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub job_id: JobId,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/generate
///
/// Validates the request and queues a job. Returns 202 as soon as the job
/// is registered; generation happens in the background.
pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    input.validate()?;

    let prompt = validate_prompt(&input.prompt)?;
    let steps = validate_steps(
        input.steps.unwrap_or(i64::from(DEFAULT_STEPS)),
        state.registry.max_steps(),
    )?;
    let mode = input.mode.as_deref().unwrap_or(DEFAULT_MODE);

    let job_id = state.generation.submit_with_mode(&prompt, steps, mode)?;
    tracing::info!(job_id = %job_id, steps, mode, "Generation requested");

    Ok((StatusCode::ACCEPTED, Json(GenerateResponse { job_id })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/status[?job_id=]
///
/// With an id, the snapshot of that job. Without one, the latest job, or
/// `{"status":"idle"}` when nothing has been submitted yet.
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> AppResult<Response> {
    if let Some(raw) = params.job_id.as_deref() {
        let job_id = parse_job_id(raw)?;
        return Ok(Json(state.registry.get_status(job_id)?).into_response());
    }

    Ok(match state.registry.latest() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => Json(json!({ "status": "idle" })).into_response(),
    })
}

/// GET /api/jobs[?limit=]
///
/// Most recent jobs first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> impl IntoResponse {
    Json(state.registry.list_recent(params.clamped_limit()))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.registry.get_status(job_id)?))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/jobs/{id}/cancel
///
/// Fails the job with a cancellation reason and stops the engine. Returns
/// 202 with the now-terminal snapshot.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&id)?;
    state.generation.cancel(job_id)?;
    let snapshot = state.registry.get_status(job_id)?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}
