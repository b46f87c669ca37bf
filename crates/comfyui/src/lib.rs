//! ComfyUI binding for the Imagine generation pipeline.
//!
//! Provides typed WebSocket message parsing, the REST wrappers needed to
//! queue a prompt and download its output, a txt2img workflow builder,
//! and [`engine::ComfyUIEngine`], which ties them together behind the
//! pipeline's `GenerationEngine` capability.

pub mod api;
pub mod client;
pub mod engine;
pub mod history;
pub mod messages;
pub mod workflow;

pub use engine::{ComfyUIEngine, ComfyUISettings};
