//! Shared query parameter types for API handlers.

use serde::Deserialize;

/// Listing size used when `?limit=` is absent.
pub const DEFAULT_LIST_LIMIT: i64 = 20;

/// Upper bound for `?limit=`.
pub const MAX_LIST_LIMIT: i64 = 100;

/// `GET /api/jobs?limit=`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListParams {
    pub limit: Option<i64>,
}

impl JobListParams {
    /// The requested limit clamped to `1..=MAX_LIST_LIMIT`.
    pub fn clamped_limit(&self) -> usize {
        // Clamped to a small positive range.
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT) as usize
    }
}

/// `GET /api/status?job_id=`.
///
/// The id is kept as a string so a malformed value reports `UNKNOWN_JOB`
/// rather than a query rejection.
#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    pub job_id: Option<String>,
}
