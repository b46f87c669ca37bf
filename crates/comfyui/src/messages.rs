//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. Only the kinds needed to follow a
//! single prompt to completion are modelled; anything else fails to parse
//! and is skipped by the caller.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth).
    #[serde(rename = "status")]
    Status(StatusData),

    #[serde(rename = "execution_start")]
    ExecutionStart(PromptRef),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A node started executing. `node: null` means the prompt finished.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Sampler step progress.
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// Sent by newer ComfyUI builds once every node has run.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptRef),

    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptRef),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload carrying only the prompt id.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    /// Absent on some older builds' idle notifications.
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: u32,
    pub max: u32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    pub exception_message: String,
    pub exception_type: String,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

// ---------------------------------------------------------------------------
// Prompt tracking
// ---------------------------------------------------------------------------

/// What a message means for one tracked prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptUpdate {
    /// Sampler advanced to `value` of `max`.
    Progress { value: u32, max: u32 },
    /// Every node ran; outputs are in the history.
    Finished,
    /// Execution stopped with an error.
    Failed(String),
    /// Execution was interrupted on the server.
    Interrupted,
}

impl ComfyUIMessage {
    /// Interpret this message for `prompt_id`. Returns `None` for messages
    /// about other prompts or that carry no state change.
    ///
    /// Progress frames without a prompt id are attributed to the tracked
    /// prompt; a connection follows one prompt at a time.
    pub fn update_for(&self, prompt_id: &str) -> Option<PromptUpdate> {
        let ours = |id: &str| id == prompt_id;
        match self {
            Self::Progress(data) if data.prompt_id.as_deref().map_or(true, ours) => {
                Some(PromptUpdate::Progress {
                    value: data.value,
                    max: data.max,
                })
            }
            Self::Executing(ExecutingData {
                node: None,
                prompt_id: Some(id),
            }) if ours(id.as_str()) => Some(PromptUpdate::Finished),
            Self::ExecutionSuccess(data) if ours(data.prompt_id.as_str()) => {
                Some(PromptUpdate::Finished)
            }
            Self::ExecutionError(data) if ours(data.prompt_id.as_str()) => {
                Some(PromptUpdate::Failed(format!(
                    "{}: {}",
                    data.exception_type, data.exception_message
                )))
            }
            Self::ExecutionInterrupted(data) if ours(data.prompt_id.as_str()) => {
                Some(PromptUpdate::Interrupted)
            }
            _ => None,
        }
    }
}
