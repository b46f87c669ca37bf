//! Job lifecycle status and the read-only snapshot handed to callers.
//!
//! The mutable job record lives inside the registry; everything outside it
//! only ever sees a [`JobSnapshot`], an owned copy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a job. Transitions only move forward:
/// `queued -> running -> {completed | failed}` (or `queued -> failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Wire / display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Occupies the single generation slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Position in the lifecycle, used to assert transitions never regress.
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable copy of a job's state at the time it was read.
///
/// `artifact_url` and `error` are mutually exclusive: the first is only set
/// on `completed`, the second only on `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub prompt: String,
    /// Free-form label supplied by the submitter (`"local"` by default).
    pub mode: String,
    pub status: JobStatus,
    pub current_step: u32,
    pub total_steps: u32,
    /// Percentage in `0.0..=100.0`, derived from the step counters.
    pub progress: f64,
    /// Seconds since the job started running; frozen once terminal.
    pub elapsed_time: f64,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark(&self) -> JobMark {
        JobMark::new(self.status, self.current_step)
    }
}

// ---------------------------------------------------------------------------
// Mark
// ---------------------------------------------------------------------------

/// How far a job has advanced along its lifecycle.
///
/// Every transition of a job produces a strictly greater mark than the one
/// before it, so two views of the same job can be ordered by comparing
/// marks. Terminal marks compare above every running step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct JobMark {
    rank: u8,
    step: u32,
}

impl JobMark {
    pub fn new(status: JobStatus, current_step: u32) -> Self {
        let step = if status.is_terminal() {
            u32::MAX
        } else {
            current_step
        };
        Self {
            rank: status.rank(),
            step,
        }
    }
}

/// Completion percentage for `current` of `total` steps, rounded to one decimal.
pub fn progress_percent(current: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = f64::from(current.min(total)) / f64::from(total) * 100.0;
    (pct * 10.0).round() / 10.0
}
