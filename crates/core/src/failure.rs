//! Reasons a job ends in `failed`.
//!
//! These never surface as HTTP errors. They are rendered into the job's
//! `error` field via [`JobFailure::reason`], which always sanitizes.

use crate::sanitize::sanitize_reason;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    /// The generation engine returned an error.
    #[error("Generation failed: {0}")]
    Engine(String),

    /// The engine did not reach a terminal state within the wall-clock budget.
    #[error("Generation timed out after {budget_secs}s")]
    Timeout { budget_secs: u64 },

    /// The artifact store could not persist the output.
    #[error("Failed to store artifact: {0}")]
    Storage(String),

    /// The run was stopped on request.
    #[error("Generation stopped by operator")]
    Cancelled,
}

impl JobFailure {
    /// Sanitized, human-readable reason suitable for remote clients.
    pub fn reason(&self) -> String {
        sanitize_reason(&self.to_string())
    }
}
