//! Out-of-band job execution.
//!
//! [`GenerationService`] is the only component that drives the engine. It
//! registers a job, returns its id immediately, and runs the generation on
//! a spawned task. Every way a run can end (engine error, panic, storage
//! error, timeout, cancellation) is funnelled into exactly one registry
//! terminal call, so no job is ever left `running`.
//!
//! The generation slot stays taken until the runner has stopped using the
//! engine, including after a cancellation has already failed the job.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use imagine_core::error::CoreError;
use imagine_core::failure::JobFailure;
use imagine_core::types::JobId;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::engine::{GenerationEngine, GenerationRequest, ProgressSink};
use crate::registry::{JobRegistry, DEFAULT_MODE};
use crate::store::ArtifactStore;

/// Default wall-clock budget for one generation.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

type RunTokens = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

/// Submits jobs and runs them against the configured engine and store.
pub struct GenerationService {
    registry: Arc<JobRegistry>,
    engine: Arc<dyn GenerationEngine>,
    store: Arc<dyn ArtifactStore>,
    timeout: Duration,
    runs: RunTokens,
    tasks: TaskTracker,
}

impl GenerationService {
    pub fn new(
        registry: Arc<JobRegistry>,
        engine: Arc<dyn GenerationEngine>,
        store: Arc<dyn ArtifactStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            timeout,
            runs: Arc::default(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Register a job and start it in the background.
    ///
    /// Returns as soon as the job is `queued`; must be called from within a
    /// tokio runtime.
    pub fn submit(&self, prompt: &str, total_steps: u32) -> Result<JobId, CoreError> {
        self.submit_with_mode(prompt, total_steps, DEFAULT_MODE)
    }

    pub fn submit_with_mode(
        &self,
        prompt: &str,
        total_steps: u32,
        mode: &str,
    ) -> Result<JobId, CoreError> {
        let job_id = self.registry.submit_with_mode(prompt, total_steps, mode)?;
        let snapshot = self.registry.get_status(job_id)?;

        let token = CancellationToken::new();
        lock_runs(&self.runs).insert(job_id, token.clone());

        let run = JobRun {
            request: GenerationRequest {
                job_id,
                prompt: snapshot.prompt,
                total_steps: snapshot.total_steps,
                mode: snapshot.mode,
            },
            registry: Arc::clone(&self.registry),
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
            timeout: self.timeout,
            token,
            runs: Arc::clone(&self.runs),
        };
        self.tasks.spawn(run.execute());

        Ok(job_id)
    }

    /// Stop a queued or running job.
    ///
    /// The job is failed immediately with a cancellation reason; the runner
    /// then abandons the engine call, asks the engine to interrupt, and only
    /// then frees the generation slot.
    pub fn cancel(&self, job_id: JobId) -> Result<(), CoreError> {
        let snapshot = self.registry.get_status(job_id)?;
        if snapshot.is_terminal() {
            return Err(CoreError::AlreadyTerminal {
                id: job_id,
                status: snapshot.status,
            });
        }

        self.registry
            .fail_in_flight(job_id, &JobFailure::Cancelled.to_string())?;
        if let Some(token) = lock_runs(&self.runs).get(&job_id) {
            token.cancel();
        }
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(())
    }

    /// Cancel the active job, if any. Returns its id.
    pub fn cancel_active(&self) -> Result<Option<JobId>, CoreError> {
        match self.registry.active_job() {
            Some(job_id) => self.cancel(job_id).map(|()| Some(job_id)),
            None => Ok(None),
        }
    }

    /// Stop every in-flight run and wait until each has applied its
    /// terminal transition.
    pub async fn shutdown(&self) {
        self.tasks.close();
        for (job_id, token) in lock_runs(&self.runs).drain() {
            tracing::info!(job_id = %job_id, "Stopping in-flight generation");
            token.cancel();
        }
        self.tasks.wait().await;
        tracing::info!("All generation runs stopped");
    }
}

fn lock_runs(runs: &RunTokens) -> std::sync::MutexGuard<'_, HashMap<JobId, CancellationToken>> {
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Everything one background run needs, moved onto its task.
struct JobRun {
    request: GenerationRequest,
    registry: Arc<JobRegistry>,
    engine: Arc<dyn GenerationEngine>,
    store: Arc<dyn ArtifactStore>,
    timeout: Duration,
    token: CancellationToken,
    runs: RunTokens,
}

impl JobRun {
    async fn execute(self) {
        let job_id = self.request.job_id;
        let _slot = SlotRelease {
            job_id,
            registry: Arc::clone(&self.registry),
            runs: Arc::clone(&self.runs),
        };

        match self.registry.mark_running(job_id) {
            Ok(()) => {
                let outcome = self.generate().await;
                self.finish(outcome).await;
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Run abandoned before start");
            }
        }
    }

    /// Run the engine under the cancellation token and wall-clock budget.
    async fn generate(&self) -> Result<Vec<u8>, JobFailure> {
        let job_id = self.request.job_id;
        let registry = Arc::clone(&self.registry);
        let sink = ProgressSink::new(move |step, elapsed| {
            if let Err(e) = registry.report_progress(job_id, step, elapsed) {
                tracing::debug!(job_id = %job_id, error = %e, "Progress report rejected");
            }
        });

        tracing::debug!(
            job_id = %job_id,
            engine = self.engine.name(),
            timeout_secs = self.timeout.as_secs(),
            "Starting generation",
        );

        let work = AssertUnwindSafe(self.engine.generate(&self.request, sink)).catch_unwind();

        let outcome = tokio::select! {
            _ = self.token.cancelled() => Err(JobFailure::Cancelled),
            result = tokio::time::timeout(self.timeout, work) => match result {
                Err(_) => Err(JobFailure::Timeout {
                    budget_secs: self.timeout.as_secs(),
                }),
                Ok(Err(_panic)) => Err(JobFailure::Engine("engine panicked".into())),
                Ok(Ok(Err(e))) => Err(JobFailure::Engine(format!("{e:#}"))),
                Ok(Ok(Ok(bytes))) => Ok(bytes),
            },
        };

        if matches!(outcome, Err(JobFailure::Cancelled | JobFailure::Timeout { .. })) {
            self.engine.interrupt().await;
        }
        outcome
    }

    /// Persist the artifact and apply the single terminal transition.
    async fn finish(&self, outcome: Result<Vec<u8>, JobFailure>) {
        let job_id = self.request.job_id;

        let result = match outcome {
            Ok(bytes) => match self.store.save(job_id, &bytes).await {
                Ok(url) => self.registry.complete(job_id, &url),
                Err(e) => self
                    .registry
                    .fail(job_id, &JobFailure::Storage(e.to_string()).to_string()),
            },
            Err(failure) => {
                tracing::debug!(job_id = %job_id, error = %failure, "Generation did not succeed");
                self.registry.fail(job_id, &failure.to_string())
            }
        };

        // AlreadyTerminal here means the job was cancelled while finishing.
        if let Err(e) = result {
            tracing::debug!(job_id = %job_id, error = %e, "Terminal transition skipped");
        }
    }
}

/// Frees the generation slot when the runner exits, even by panic.
struct SlotRelease {
    job_id: JobId,
    registry: Arc<JobRegistry>,
    runs: RunTokens,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        lock_runs(&self.runs).remove(&self.job_id);
        self.registry.release(self.job_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use imagine_core::job::{JobSnapshot, JobStatus};
    use imagine_core::job_events::JobEvent;
    use imagine_events::EventBus;
    use tokio::sync::Notify;

    use crate::store::LocalArtifactStore;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    /// Scripted engine: reports every step, optionally pausing at one.
    enum Script {
        Succeed,
        FailAt(u32, &'static str),
        Panic,
        Hang,
        PauseAt(u32, Arc<Notify>),
        LateProgress,
    }

    /// A hung generation keeps the engine busy until `interrupt` returns.
    struct FakeEngine {
        script: Script,
        interrupted: AtomicBool,
        interrupt_delay: Duration,
        busy: AtomicUsize,
        peak_busy: AtomicUsize,
    }

    impl FakeEngine {
        fn new(script: Script) -> Arc<Self> {
            Self::with_interrupt_delay(script, Duration::ZERO)
        }

        fn with_interrupt_delay(script: Script, interrupt_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script,
                interrupted: AtomicBool::new(false),
                interrupt_delay,
                busy: AtomicUsize::new(0),
                peak_busy: AtomicUsize::new(0),
            })
        }

        async fn run_script(
            &self,
            request: &GenerationRequest,
            progress: ProgressSink,
        ) -> anyhow::Result<Vec<u8>> {
            match &self.script {
                Script::Hang => std::future::pending().await,
                Script::Panic => panic!("model exploded"),
                Script::LateProgress => {
                    progress.report(request.total_steps, 1.0);
                    let sink = progress.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        sink.report(1, 2.0);
                    });
                    Ok(PNG.to_vec())
                }
                script => {
                    for step in 1..=request.total_steps {
                        if let Script::FailAt(at, msg) = script {
                            if step == *at {
                                anyhow::bail!("{msg}");
                            }
                        }
                        if let Script::PauseAt(at, gate) = script {
                            if step == *at {
                                gate.notified().await;
                            }
                        }
                        progress.report(step, f64::from(step) * 0.1);
                    }
                    Ok(PNG.to_vec())
                }
            }
        }
    }

    #[async_trait]
    impl GenerationEngine for FakeEngine {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
            progress: ProgressSink,
        ) -> anyhow::Result<Vec<u8>> {
            let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_busy.fetch_max(busy, Ordering::SeqCst);
            let result = self.run_script(request, progress).await;
            self.busy.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn interrupt(&self) {
            tokio::time::sleep(self.interrupt_delay).await;
            self.interrupted.store(true, Ordering::SeqCst);
            let _ = self
                .busy
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }

    struct Harness {
        service: GenerationService,
        bus: Arc<EventBus>,
        _dir: tempfile::TempDir,
    }

    fn harness(engine: Arc<FakeEngine>, timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(JobRegistry::new(Arc::clone(&bus), 150, 50));
        let store = Arc::new(LocalArtifactStore::new(dir.path()));
        Harness {
            service: GenerationService::new(registry, engine, store, timeout),
            bus,
            _dir: dir,
        }
    }

    async fn wait_terminal(service: &GenerationService, id: JobId) -> JobSnapshot {
        for _ in 0..200 {
            let snap = service.registry().get_status(id).unwrap();
            if snap.is_terminal() {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    async fn wait_idle(service: &GenerationService) {
        for _ in 0..200 {
            if service.registry().active_job().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("generation slot was never released");
    }

    async fn wait_running(service: &GenerationService, id: JobId) {
        for _ in 0..200 {
            if service.registry().get_status(id).unwrap().status == JobStatus::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never started");
    }

    #[tokio::test]
    async fn cancel_while_queued_fails_without_starting_engine() {
        let engine = FakeEngine::new(Script::Hang);
        let h = harness(Arc::clone(&engine), Duration::from_secs(5));
        // The runner task has not been polled yet on the current-thread runtime.
        let id = h.service.submit("a cat", 20).unwrap();
        h.service.cancel(id).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = h.service.registry().get_status(id).unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.started_at.is_none());
        assert!(!engine.interrupted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn successful_run_completes_with_artifact() {
        let h = harness(FakeEngine::new(Script::Succeed), Duration::from_secs(5));
        let id = h.service.submit("a cat", 20).unwrap();

        let immediate = h.service.registry().get_status(id).unwrap();
        assert!(matches!(immediate.status, JobStatus::Queued | JobStatus::Running));

        let snap = wait_terminal(&h.service, id).await;
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.current_step, 20);
        assert_eq!(snap.artifact_url, Some(format!("/artifacts/{id}.png")));
        assert!(snap.error.is_none());
        assert!(h.service.registry().active_job().is_none());
    }

    #[tokio::test]
    async fn mid_run_status_reflects_reported_step() {
        let gate = Arc::new(Notify::new());
        let engine = FakeEngine::new(Script::PauseAt(11, Arc::clone(&gate)));
        let h = harness(engine, Duration::from_secs(5));
        let id = h.service.submit("a cat", 20).unwrap();

        let mut snap = h.service.registry().get_status(id).unwrap();
        for _ in 0..200 {
            if snap.current_step == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            snap = h.service.registry().get_status(id).unwrap();
        }
        assert_eq!(snap.status, JobStatus::Running);
        assert_eq!(snap.current_step, 10);

        gate.notify_one();
        let done = wait_terminal(&h.service, id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.current_step, 20);
    }

    #[tokio::test]
    async fn engine_error_fails_job_and_frees_the_slot() {
        let engine = FakeEngine::new(Script::FailAt(5, "CUDA out of memory in /srv/app/model.py"));
        let h = harness(engine, Duration::from_secs(5));
        let id = h.service.submit("a cat", 20).unwrap();

        let snap = wait_terminal(&h.service, id).await;
        assert_eq!(snap.status, JobStatus::Failed);
        let error = snap.error.unwrap();
        assert!(error.contains("CUDA out of memory"), "{error}");
        assert!(!error.contains("/srv/app"), "{error}");
        assert!(snap.artifact_url.is_none());
        assert_eq!(snap.current_step, 4);

        // The registry accepts the next job.
        h.service.registry().submit("next", 5).unwrap();
    }

    #[tokio::test]
    async fn engine_panic_is_contained() {
        let h = harness(FakeEngine::new(Script::Panic), Duration::from_secs(5));
        let id = h.service.submit("a cat", 20).unwrap();

        let snap = wait_terminal(&h.service, id).await;
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn hung_engine_times_out_and_is_interrupted() {
        let engine = FakeEngine::new(Script::Hang);
        let h = harness(Arc::clone(&engine), Duration::from_millis(100));
        let id = h.service.submit("a cat", 20).unwrap();

        let snap = wait_terminal(&h.service, id).await;
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.error.unwrap().contains("timed out"));
        // interrupt() runs right after the timeout fires, before fail().
        assert!(engine.interrupted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn busy_submission_does_not_disturb_running_job() {
        let engine = FakeEngine::new(Script::Hang);
        let h = harness(engine, Duration::from_secs(5));
        let id = h.service.submit("a cat", 20).unwrap();

        let err = h.service.submit("a dog", 20).unwrap_err();
        assert!(matches!(err, CoreError::Busy { active } if active == id));
        assert_eq!(h.service.registry().list_recent(10).len(), 1);

        h.service.cancel(id).unwrap();
    }

    #[tokio::test]
    async fn cancel_fails_job_and_interrupts_engine() {
        let engine = FakeEngine::new(Script::Hang);
        let h = harness(Arc::clone(&engine), Duration::from_secs(5));
        let id = h.service.submit("a cat", 20).unwrap();
        wait_running(&h.service, id).await;

        assert_eq!(h.service.cancel_active().unwrap(), Some(id));
        let snap = h.service.registry().get_status(id).unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.error.unwrap().contains("stopped"));

        wait_idle(&h.service).await;
        assert!(engine.interrupted.load(Ordering::SeqCst));

        assert!(matches!(
            h.service.cancel(id),
            Err(CoreError::AlreadyTerminal { status: JobStatus::Failed, .. })
        ));
        assert_eq!(h.service.cancel_active().unwrap(), None);
    }

    #[tokio::test]
    async fn resubmit_after_cancel_waits_for_the_engine_to_stop() {
        let engine = FakeEngine::with_interrupt_delay(Script::Hang, Duration::from_millis(100));
        let h = harness(Arc::clone(&engine), Duration::from_secs(5));
        let first = h.service.submit("a cat", 20).unwrap();
        wait_running(&h.service, first).await;

        h.service.cancel(first).unwrap();
        assert_eq!(
            h.service.registry().get_status(first).unwrap().status,
            JobStatus::Failed
        );
        assert!(matches!(
            h.service.submit("a dog", 20),
            Err(CoreError::Busy { active }) if active == first
        ));

        let mut second = None;
        for _ in 0..200 {
            match h.service.submit("a dog", 20) {
                Ok(id) => {
                    second = Some(id);
                    break;
                }
                Err(CoreError::Busy { .. }) => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        let second = second.expect("slot never freed");
        assert!(engine.interrupted.load(Ordering::SeqCst));

        wait_running(&h.service, second).await;
        assert_eq!(engine.peak_busy.load(Ordering::SeqCst), 1);

        h.service.cancel(second).unwrap();
        wait_idle(&h.service).await;
    }

    #[tokio::test]
    async fn shutdown_waits_for_runs_to_finish() {
        let engine = FakeEngine::with_interrupt_delay(Script::Hang, Duration::from_millis(50));
        let h = harness(Arc::clone(&engine), Duration::from_secs(5));
        let mut rx = h.bus.subscribe();
        let id = h.service.submit("a cat", 20).unwrap();
        wait_running(&h.service, id).await;

        h.service.shutdown().await;

        assert!(engine.interrupted.load(Ordering::SeqCst));
        let snap = h.service.registry().get_status(id).unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(h.service.registry().active_job().is_none());

        let events: Vec<JobEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(events.last(), Some(JobEvent::Error { .. })));
    }

    #[tokio::test]
    async fn late_progress_after_completion_is_ignored() {
        let h = harness(FakeEngine::new(Script::LateProgress), Duration::from_secs(5));
        let mut rx = h.bus.subscribe();
        let id = h.service.submit("a cat", 8).unwrap();

        let done = wait_terminal(&h.service, id).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let later = h.service.registry().get_status(id).unwrap();
        assert_eq!(later, done);

        let mut last_kind = "";
        while let Ok(event) = rx.try_recv() {
            last_kind = event.msg_type();
        }
        assert_eq!(last_kind, "completed");
    }

    #[tokio::test]
    async fn push_sequence_ends_with_exactly_one_terminal_event() {
        let h = harness(FakeEngine::new(Script::Succeed), Duration::from_secs(5));
        let mut rx = h.bus.subscribe();
        let id = h.service.submit("a cat", 5).unwrap();
        wait_terminal(&h.service, id).await;

        let events: Vec<JobEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(events.first(), Some(JobEvent::JobStarted { .. })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().unwrap().is_terminal());

        let steps: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress { current_step, .. } => Some(*current_step),
                _ => None,
            })
            .collect();
        assert!(steps.windows(2).all(|w| w[0] <= w[1]), "{steps:?}");
    }
}
