//! Push events emitted on job transitions, plus the WebSocket message type
//! constants used by the api crate.
//!
//! Events serialize with an internal `"type"` tag so they can be written
//! to a WebSocket verbatim.

use serde::{Deserialize, Serialize};

use crate::job::{JobMark, JobStatus};
use crate::types::JobId;

/// The job entered `running`.
pub const MSG_TYPE_JOB_STARTED: &str = "job_started";

/// Step counter advanced.
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Job completed; carries the artifact reference.
pub const MSG_TYPE_COMPLETED: &str = "completed";

/// Job failed; carries the sanitized reason.
pub const MSG_TYPE_ERROR: &str = "error";

/// Server → client snapshot of the current (or requested) job.
pub const MSG_TYPE_STATUS: &str = "status";

/// Server → client host resource sample, sent periodically.
pub const MSG_TYPE_TELEMETRY: &str = "telemetry";

/// Client → server request for a `status` message.
pub const MSG_TYPE_REQUEST_STATUS: &str = "request_status";

/// A job state change observed by push subscribers.
///
/// For a single job the sequence is `job_started`, zero or more `progress`
/// with non-decreasing `current_step`, then exactly one of `completed` /
/// `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    #[serde(rename = "job_started")]
    JobStarted {
        job_id: JobId,
        prompt: String,
        total_steps: u32,
    },

    #[serde(rename = "progress")]
    Progress {
        job_id: JobId,
        current_step: u32,
        total_steps: u32,
        progress: f64,
        elapsed_time: f64,
    },

    #[serde(rename = "completed")]
    Completed {
        job_id: JobId,
        prompt: String,
        artifact_url: String,
        total_steps: u32,
        elapsed_time: f64,
    },

    #[serde(rename = "error")]
    Error { job_id: JobId, error: String },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobStarted { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Error { job_id, .. } => *job_id,
        }
    }

    /// The `"type"` tag this event serializes with.
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => MSG_TYPE_JOB_STARTED,
            Self::Progress { .. } => MSG_TYPE_PROGRESS,
            Self::Completed { .. } => MSG_TYPE_COMPLETED,
            Self::Error { .. } => MSG_TYPE_ERROR,
        }
    }

    /// `completed` and `error` are always the last event for their job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    /// The mark the job reached with this event.
    pub fn mark(&self) -> JobMark {
        match self {
            Self::JobStarted { .. } => JobMark::new(JobStatus::Running, 0),
            Self::Progress { current_step, .. } => JobMark::new(JobStatus::Running, *current_step),
            Self::Completed { total_steps, .. } => JobMark::new(JobStatus::Completed, *total_steps),
            Self::Error { .. } => JobMark::new(JobStatus::Failed, 0),
        }
    }
}
