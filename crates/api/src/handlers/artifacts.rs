use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /artifacts/{file}
///
/// Raw image bytes with a content type derived from the extension.
pub async fn serve_artifact(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> AppResult<impl IntoResponse> {
    let artifact = state
        .artifacts
        .load(&file)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Artifact {file}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        artifact.bytes,
    ))
}
