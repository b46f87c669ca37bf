//! In-memory job registry.
//!
//! [`JobRegistry`] owns the authoritative state of every retained job. All
//! mutations go through a single mutex, and the matching [`JobEvent`] is
//! published while that lock is held, so push subscribers observe
//! transitions in exactly the order they were applied.
//!
//! The registry is synchronous: progress callbacks may arrive
//! from engine threads as well as from tokio tasks.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use imagine_core::error::CoreError;
use imagine_core::job::{progress_percent, JobSnapshot, JobStatus};
use imagine_core::job_events::JobEvent;
use imagine_core::sanitize::sanitize_reason;
use imagine_core::types::{new_job_id, JobId, Timestamp};
use imagine_core::validation::{validate_prompt, validate_steps};
use imagine_events::EventBus;

/// Default number of jobs kept in memory.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Mode label used when the submitter does not provide one.
pub const DEFAULT_MODE: &str = "local";

// ---------------------------------------------------------------------------
// Internal record
// ---------------------------------------------------------------------------

struct JobRecord {
    id: JobId,
    prompt: String,
    mode: String,
    status: JobStatus,
    current_step: u32,
    total_steps: u32,
    /// Largest elapsed value seen so far. Frozen once terminal.
    elapsed: f64,
    started: Option<Instant>,
    artifact_url: Option<String>,
    error: Option<String>,
    created_at: Timestamp,
    started_at: Option<Timestamp>,
    finished_at: Option<Timestamp>,
}

impl JobRecord {
    fn new(prompt: String, total_steps: u32, mode: String) -> Self {
        Self {
            id: new_job_id(),
            prompt,
            mode,
            status: JobStatus::Queued,
            current_step: 0,
            total_steps,
            elapsed: 0.0,
            started: None,
            artifact_url: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Elapsed seconds as observed now. Running jobs advance with the wall
    /// clock even between engine callbacks.
    fn elapsed_now(&self) -> f64 {
        match (self.status, self.started) {
            (JobStatus::Running, Some(started)) => {
                self.elapsed.max(started.elapsed().as_secs_f64())
            }
            _ => self.elapsed,
        }
    }

    /// Stop the clock. Called exactly once, on the terminal transition.
    fn freeze(&mut self, status: JobStatus) {
        self.elapsed = self.elapsed_now();
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            prompt: self.prompt.clone(),
            mode: self.mode.clone(),
            status: self.status,
            current_step: self.current_step,
            total_steps: self.total_steps,
            progress: progress_percent(self.current_step, self.total_steps),
            elapsed_time: self.elapsed_now(),
            artifact_url: self.artifact_url.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    /// Creation order, oldest at the front.
    order: VecDeque<JobId>,
    /// The job holding the single generation slot, if any.
    active: Option<JobId>,
}

impl Inner {
    fn record_mut(&mut self, id: JobId) -> Result<&mut JobRecord, CoreError> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::UnknownJob(id.to_string()))
    }

    fn release(&mut self, id: JobId) {
        if self.active == Some(id) {
            self.active = None;
        }
    }

    /// Drop the oldest terminal jobs until the history fits `limit`.
    /// The active job is never evicted.
    fn evict(&mut self, limit: usize) {
        while self.jobs.len() > limit {
            let Some(pos) = self.order.iter().position(|id| {
                self.jobs
                    .get(id)
                    .is_some_and(|record| record.status.is_terminal())
            }) else {
                break;
            };
            if let Some(id) = self.order.remove(pos) {
                self.jobs.remove(&id);
                tracing::debug!(job_id = %id, "Evicted job from history");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Thread-safe job registry enforcing single-job concurrency.
///
/// Shared as `Arc<JobRegistry>`. Every read returns an owned
/// [`JobSnapshot`]; no caller can reach the live records.
pub struct JobRegistry {
    inner: Mutex<Inner>,
    bus: Arc<EventBus>,
    max_steps: u32,
    history_limit: usize,
}

impl JobRegistry {
    /// Create an empty registry publishing transitions onto `bus`.
    ///
    /// `history_limit` is raised to 1 so the active job always fits.
    pub fn new(bus: Arc<EventBus>, max_steps: u32, history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bus,
            max_steps,
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Transitions never panic mid-update, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Register a new `queued` job with the default mode label.
    pub fn submit(&self, prompt: &str, total_steps: u32) -> Result<JobId, CoreError> {
        self.submit_with_mode(prompt, total_steps, DEFAULT_MODE)
    }

    /// Register a new `queued` job.
    ///
    /// Fails with [`CoreError::Validation`] for an empty prompt or a step
    /// count outside `1..=max_steps`, and with [`CoreError::Busy`] while
    /// another job is queued or running. Never blocks on generation.
    pub fn submit_with_mode(
        &self,
        prompt: &str,
        total_steps: u32,
        mode: &str,
    ) -> Result<JobId, CoreError> {
        let prompt = validate_prompt(prompt)?;
        let total_steps = validate_steps(i64::from(total_steps), self.max_steps)?;
        let mode = match mode.trim() {
            "" => DEFAULT_MODE.to_string(),
            m => m.to_string(),
        };

        let mut inner = self.lock();
        if let Some(active) = inner.active {
            return Err(CoreError::Busy { active });
        }

        let record = JobRecord::new(prompt, total_steps, mode);
        let id = record.id;
        inner.jobs.insert(id, record);
        inner.order.push_back(id);
        inner.active = Some(id);
        inner.evict(self.history_limit);

        tracing::info!(job_id = %id, total_steps, "Job queued");
        Ok(id)
    }

    /// `queued -> running`. Emits `job_started`.
    pub fn mark_running(&self, id: JobId) -> Result<(), CoreError> {
        let mut inner = self.lock();
        let record = inner.record_mut(id)?;
        match record.status {
            JobStatus::Queued => {}
            status if status.is_terminal() => {
                return Err(CoreError::AlreadyTerminal { id, status });
            }
            from => {
                return Err(CoreError::InvalidTransition {
                    id,
                    from,
                    to: JobStatus::Running,
                });
            }
        }

        record.status = JobStatus::Running;
        record.started = Some(Instant::now());
        record.started_at = Some(Utc::now());

        self.bus.publish(JobEvent::JobStarted {
            job_id: id,
            prompt: record.prompt.clone(),
            total_steps: record.total_steps,
        });
        tracing::info!(job_id = %id, "Job running");
        Ok(())
    }

    /// Record engine progress.
    ///
    /// Steps are clamped to `[last recorded, total_steps]` so duplicated or
    /// reordered callbacks never move the counter backwards. Calls after a
    /// terminal transition are ignored. A `progress` event is emitted only
    /// when the step actually advances.
    pub fn report_progress(
        &self,
        id: JobId,
        current_step: u32,
        elapsed_time: f64,
    ) -> Result<(), CoreError> {
        let mut inner = self.lock();
        let record = inner.record_mut(id)?;
        match record.status {
            JobStatus::Running => {}
            status if status.is_terminal() => {
                tracing::trace!(job_id = %id, %status, "Ignoring late progress");
                return Ok(());
            }
            from => {
                return Err(CoreError::InvalidTransition {
                    id,
                    from,
                    to: JobStatus::Running,
                });
            }
        }

        if elapsed_time.is_finite() && elapsed_time > record.elapsed {
            record.elapsed = elapsed_time;
        }

        let step = current_step.clamp(record.current_step, record.total_steps);
        if step == record.current_step {
            return Ok(());
        }
        record.current_step = step;

        self.bus.publish(JobEvent::Progress {
            job_id: id,
            current_step: step,
            total_steps: record.total_steps,
            progress: progress_percent(step, record.total_steps),
            elapsed_time: record.elapsed_now(),
        });
        Ok(())
    }

    /// `running -> completed`. Sets the artifact and snaps `current_step`
    /// to `total_steps`.
    ///
    /// A second terminal call fails with [`CoreError::AlreadyTerminal`] and
    /// changes nothing.
    pub fn complete(&self, id: JobId, artifact_url: &str) -> Result<JobSnapshot, CoreError> {
        let mut inner = self.lock();
        let record = inner.record_mut(id)?;
        match record.status {
            JobStatus::Running => {}
            status if status.is_terminal() => {
                return Err(CoreError::AlreadyTerminal { id, status });
            }
            from => {
                return Err(CoreError::InvalidTransition {
                    id,
                    from,
                    to: JobStatus::Completed,
                });
            }
        }

        record.current_step = record.total_steps;
        record.artifact_url = Some(artifact_url.to_string());
        record.freeze(JobStatus::Completed);
        let snapshot = record.snapshot();
        inner.release(id);

        self.bus.publish(JobEvent::Completed {
            job_id: id,
            prompt: snapshot.prompt.clone(),
            artifact_url: artifact_url.to_string(),
            total_steps: snapshot.total_steps,
            elapsed_time: snapshot.elapsed_time,
        });
        tracing::info!(
            job_id = %id,
            elapsed_secs = snapshot.elapsed_time,
            artifact_url,
            "Job completed",
        );
        Ok(snapshot)
    }

    /// `{queued | running} -> failed`. The reason is sanitized before it is
    /// stored or published.
    pub fn fail(&self, id: JobId, reason: &str) -> Result<JobSnapshot, CoreError> {
        self.fail_job(id, reason, true)
    }

    /// Fail a job whose engine call may still be unwinding.
    ///
    /// Same transition and event as [`fail`](Self::fail), but the job keeps
    /// the generation slot, so submissions stay `Busy` until the runner
    /// calls [`release`](Self::release).
    pub fn fail_in_flight(&self, id: JobId, reason: &str) -> Result<JobSnapshot, CoreError> {
        self.fail_job(id, reason, false)
    }

    /// Free the generation slot if `id` holds it. Returns whether it did.
    pub fn release(&self, id: JobId) -> bool {
        let mut inner = self.lock();
        let held = inner.active == Some(id);
        inner.release(id);
        if held {
            tracing::debug!(job_id = %id, "Generation slot released");
        }
        held
    }

    fn fail_job(&self, id: JobId, reason: &str, release: bool) -> Result<JobSnapshot, CoreError> {
        let mut inner = self.lock();
        let record = inner.record_mut(id)?;
        if record.status.is_terminal() {
            return Err(CoreError::AlreadyTerminal {
                id,
                status: record.status,
            });
        }

        let reason = sanitize_reason(reason);
        record.error = Some(reason.clone());
        record.freeze(JobStatus::Failed);
        let snapshot = record.snapshot();
        if release {
            inner.release(id);
        }

        self.bus.publish(JobEvent::Error {
            job_id: id,
            error: reason.clone(),
        });
        tracing::warn!(job_id = %id, reason = %reason, "Job failed");
        Ok(snapshot)
    }

    /// Owned snapshot of one job.
    pub fn get_status(&self, id: JobId) -> Result<JobSnapshot, CoreError> {
        self.lock()
            .jobs
            .get(&id)
            .map(JobRecord::snapshot)
            .ok_or_else(|| CoreError::UnknownJob(id.to_string()))
    }

    /// Up to `limit` most recently created jobs, newest first.
    pub fn list_recent(&self, limit: usize) -> Vec<JobSnapshot> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.jobs.get(id))
            .take(limit)
            .map(JobRecord::snapshot)
            .collect()
    }

    /// The most recently created job, if any job is retained.
    pub fn latest(&self) -> Option<JobSnapshot> {
        let inner = self.lock();
        inner
            .order
            .back()
            .and_then(|id| inner.jobs.get(id))
            .map(JobRecord::snapshot)
    }

    /// Id of the job occupying the generation slot.
    pub fn active_job(&self) -> Option<JobId> {
        self.lock().active
    }

    /// Number of retained jobs.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
