#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use imagine_api::config::{GenerationConfig, PlatformInfo, ServerConfig};
use imagine_api::router::build_app_router;
use imagine_api::state::AppState;
use imagine_comfyui::ComfyUISettings;
use imagine_core::job::JobSnapshot;
use imagine_core::types::JobId;
use imagine_pipeline::{GenerationEngine, GenerationRequest, LocalArtifactStore, ProgressSink};
use tempfile::TempDir;
use tower::ServiceExt;

/// Minimal PNG signature; enough for format sniffing.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// How the fake engine behaves for every job.
#[derive(Debug, Clone, Copy)]
pub enum EngineScript {
    /// Report every step, then return a PNG.
    Succeed,
    /// Report one step, then fail with a message containing a path.
    Fail,
    /// Never finish until cancelled.
    Hang,
}

pub struct FakeEngine {
    script: EngineScript,
    pub interrupted: AtomicBool,
}

impl FakeEngine {
    pub fn new(script: EngineScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            interrupted: AtomicBool::new(false),
        })
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
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
        match self.script {
            EngineScript::Succeed => {
                for step in 1..=request.total_steps {
                    progress.report(step, f64::from(step) * 0.01);
                }
                Ok(PNG.to_vec())
            }
            EngineScript::Fail => {
                progress.report(1, 0.01);
                anyhow::bail!("CUDA out of memory at /home/demo/models/sdxl.safetensors")
            }
            EngineScript::Hang => std::future::pending().await,
        }
    }

    async fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

/// Build a test `ServerConfig` with safe defaults.
///
/// Artifacts go to `artifact_dir`; the ComfyUI settings are never used
/// because tests inject their own engine.
pub fn test_config(artifact_dir: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        telemetry_interval_secs: 1,
        generation: GenerationConfig {
            artifact_dir: artifact_dir.path().to_path_buf(),
            timeout: Duration::from_secs(10),
            history_limit: 50,
            max_steps: 150,
        },
        comfyui: ComfyUISettings::default(),
        platform: PlatformInfo {
            platform: "Test Rig".to_string(),
            processor: "Unknown".to_string(),
            architecture: "x86_64".to_string(),
            ai_acceleration: "Unknown".to_string(),
        },
    }
}

/// A fully wired app. Keep `_dir` alive for the duration of the test.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub engine: Arc<FakeEngine>,
    pub _dir: TempDir,
}

impl TestApp {
    /// A fresh router sharing this app's state.
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Poll the registry until `job_id` is terminal.
    pub async fn wait_terminal(&self, job_id: JobId) -> JobSnapshot {
        self.wait_until(job_id, JobSnapshot::is_terminal).await
    }

    pub async fn wait_until(
        &self,
        job_id: JobId,
        ready: impl Fn(&JobSnapshot) -> bool,
    ) -> JobSnapshot {
        for _ in 0..200 {
            let snapshot = self.state.registry.get_status(job_id).unwrap();
            if ready(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not reach the expected state");
    }
}

/// Build the full application router with all middleware layers, backed
/// by a scripted engine and a temporary artifact directory.
///
/// Uses the same `build_app_router` as `main.rs`.
pub fn build_test_app(script: EngineScript) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let engine = FakeEngine::new(script);
    let store = Arc::new(LocalArtifactStore::new(dir.path()));

    let state = AppState::new(config.clone(), engine.clone(), store);
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        engine,
        _dir: dir,
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect a response body as raw bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Send a GET request through the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with a JSON body.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_raw(app, uri, body.to_string()).await
}

/// Send a POST request with an arbitrary body labelled as JSON.
pub async fn post_raw(app: Router, uri: &str, body: impl Into<String>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}
