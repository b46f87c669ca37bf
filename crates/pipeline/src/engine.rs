//! Generation engine capability.
//!
//! The engine is a black box: given a prompt and a step budget it
//! eventually yields encoded image bytes, reporting progress through a
//! [`ProgressSink`] along the way. Errors are opaque (`anyhow`) because the
//! service turns every one of them into a sanitized job failure.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use imagine_core::types::JobId;

/// Everything an engine needs to run one job.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub job_id: JobId,
    pub prompt: String,
    pub total_steps: u32,
    pub mode: String,
}

/// Cloneable progress callback `(step, elapsed_secs)`.
///
/// Safe to call from any thread or task, any number of times, including
/// after the job has already finished.
#[derive(Clone)]
pub struct ProgressSink {
    callback: Arc<dyn Fn(u32, f64) + Send + Sync>,
}

impl ProgressSink {
    pub fn new(callback: impl Fn(u32, f64) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// A sink that discards every report.
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, step: u32, elapsed_secs: f64) {
        (self.callback)(step, elapsed_secs);
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

/// Capability that turns a prompt into an image.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Short identifier for logs and `/health`.
    fn name(&self) -> &str;

    /// Run one generation to completion and return the encoded image.
    async fn generate(
        &self,
        request: &GenerationRequest,
        progress: ProgressSink,
    ) -> anyhow::Result<Vec<u8>>;

    /// Ask the engine to abandon whatever it is running. Invoked after a
    /// timeout or cancellation. Engines without such a hook ignore it.
    async fn interrupt(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn sink_clones_share_the_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            ProgressSink::new(move |step, elapsed| seen.lock().unwrap().push((step, elapsed)))
        };
        let other = sink.clone();

        sink.report(1, 0.5);
        std::thread::spawn(move || other.report(2, 1.0))
            .join()
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(1, 0.5), (2, 1.0)]);
    }

    #[test]
    fn noop_sink_accepts_reports() {
        ProgressSink::noop().report(5, 1.0);
    }
}
