//! [`ComfyUIEngine`]: the pipeline's `GenerationEngine` backed by a local
//! ComfyUI server.
//!
//! One generation is:
//! 1. open `/ws?clientId=<id>` (before queuing, so no progress is missed),
//! 2. `POST /prompt` with a txt2img workflow and the same client id,
//! 3. follow `progress` frames until `executing{node: null}` /
//!    `execution_success`, or fail on `execution_error` /
//!    `execution_interrupted`,
//! 4. read `/history/{prompt_id}` and download the first saved image via
//!    `/view`.

use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use imagine_pipeline::engine::{GenerationEngine, GenerationRequest, ProgressSink};
use tokio_tungstenite::tungstenite::Message;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIClient, ComfyUIStream};
use crate::history::output_images;
use crate::messages::{parse_message, PromptUpdate};
use crate::workflow::{build_txt2img, seed_from_job_id, Txt2ImgParams};

/// Model and sampler settings applied to every job.
#[derive(Debug, Clone)]
pub struct ComfyUISettings {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// WebSocket base URL. Derived from `api_url` when `None`.
    pub ws_url: Option<String>,
    pub checkpoint: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub cfg: f64,
    pub sampler: String,
    pub scheduler: String,
}

impl Default for ComfyUISettings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8188".into(),
            ws_url: None,
            checkpoint: "sd_xl_turbo_1.0_fp16.safetensors".into(),
            negative_prompt: "blurry, low quality, watermark".into(),
            width: 512,
            height: 512,
            cfg: 7.0,
            sampler: "euler".into(),
            scheduler: "normal".into(),
        }
    }
}

pub struct ComfyUIEngine {
    api: ComfyUIApi,
    client: ComfyUIClient,
    settings: ComfyUISettings,
}

impl ComfyUIEngine {
    pub fn new(settings: ComfyUISettings) -> Self {
        let ws_url = settings
            .ws_url
            .clone()
            .unwrap_or_else(|| ComfyUIClient::ws_url_for(&settings.api_url));
        Self {
            api: ComfyUIApi::new(settings.api_url.clone()),
            client: ComfyUIClient::new(ws_url),
            settings,
        }
    }

    fn workflow_params(&self, request: &GenerationRequest) -> Txt2ImgParams {
        Txt2ImgParams {
            checkpoint: self.settings.checkpoint.clone(),
            prompt: request.prompt.clone(),
            negative_prompt: self.settings.negative_prompt.clone(),
            steps: request.total_steps,
            cfg: self.settings.cfg,
            seed: seed_from_job_id(request.job_id),
            width: self.settings.width,
            height: self.settings.height,
            sampler: self.settings.sampler.clone(),
            scheduler: self.settings.scheduler.clone(),
            filename_prefix: format!("imagine_{}", request.job_id.simple()),
        }
    }

    /// Read frames until the prompt finishes. Progress is forwarded to
    /// `progress` as job steps.
    async fn follow(
        ws: &mut ComfyUIStream,
        prompt_id: &str,
        total_steps: u32,
        progress: &ProgressSink,
        started: Instant,
    ) -> anyhow::Result<()> {
        while let Some(frame) = ws.next().await {
            match frame.context("ComfyUI WebSocket receive error")? {
                Message::Text(text) => match parse_message(&text) {
                    Ok(msg) => match msg.update_for(prompt_id) {
                        Some(PromptUpdate::Progress { value, max }) => {
                            let step = scale_step(value, max, total_steps);
                            progress.report(step, started.elapsed().as_secs_f64());
                        }
                        Some(PromptUpdate::Finished) => return Ok(()),
                        Some(PromptUpdate::Failed(reason)) => {
                            bail!("ComfyUI execution error: {reason}")
                        }
                        Some(PromptUpdate::Interrupted) => {
                            bail!("ComfyUI execution was interrupted")
                        }
                        None => {}
                    },
                    Err(e) => {
                        tracing::trace!(error = %e, "Skipping unrecognised ComfyUI message");
                    }
                },
                Message::Close(frame) => {
                    tracing::debug!(?frame, "ComfyUI closed the WebSocket");
                    bail!("ComfyUI closed the connection before the prompt finished");
                }
                // Binary frames are sampler previews.
                _ => {}
            }
        }
        bail!("ComfyUI connection ended before the prompt finished")
    }
}

#[async_trait]
impl GenerationEngine for ComfyUIEngine {
    fn name(&self) -> &str {
        "comfyui"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        progress: ProgressSink,
    ) -> anyhow::Result<Vec<u8>> {
        let started = Instant::now();
        let mut conn = self.client.connect().await?;

        let workflow = build_txt2img(&self.workflow_params(request));
        let submitted = self
            .api
            .submit_workflow(&workflow, &conn.client_id)
            .await
            .context("ComfyUI rejected the workflow")?;
        check_node_errors(&submitted.node_errors)?;

        let prompt_id = submitted.prompt_id;
        tracing::info!(
            job_id = %request.job_id,
            prompt_id = %prompt_id,
            queue_position = submitted.number,
            "Workflow queued on ComfyUI",
        );

        Self::follow(
            &mut conn.ws_stream,
            &prompt_id,
            request.total_steps,
            &progress,
            started,
        )
        .await?;

        let history = self.api.get_history(&prompt_id).await?;
        let image = output_images(&history, &prompt_id)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("ComfyUI finished without producing an image"))?;
        let bytes = self.api.view(&image).await?;

        if let Err(e) = conn.ws_stream.close(None).await {
            tracing::debug!(error = %e, "ComfyUI WebSocket close failed");
        }
        Ok(bytes)
    }

    async fn interrupt(&self) {
        if let Err(e) = self.api.interrupt().await {
            tracing::warn!(error = %e, "Failed to interrupt ComfyUI");
        }
    }
}

/// Map sampler progress `value / max` onto the job's step range.
pub fn scale_step(value: u32, max: u32, total_steps: u32) -> u32 {
    if max == 0 {
        return 0;
    }
    let scaled = u64::from(value.min(max)) * u64::from(total_steps) / u64::from(max);
    // Bounded by total_steps.
    scaled as u32
}

/// `node_errors` is `{}` on success and keyed by node id otherwise.
fn check_node_errors(node_errors: &serde_json::Value) -> anyhow::Result<()> {
    match node_errors.as_object() {
        Some(errors) if !errors.is_empty() => {
            let nodes: Vec<&str> = errors.keys().map(String::as_str).collect();
            bail!("ComfyUI reported invalid nodes: {}", nodes.join(", "))
        }
        _ => Ok(()),
    }
}
