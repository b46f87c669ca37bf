//! Job tracking and execution.
//!
//! - [`registry`]: authoritative in-memory job state machine.
//! - [`engine`]: the [`engine::GenerationEngine`] capability and its progress callback.
//! - [`store`]: the [`store::ArtifactStore`] capability and the filesystem implementation.
//! - [`service`]: submits jobs, runs them out-of-band, and enforces the
//!   wall-clock budget and cancellation.

pub mod engine;
pub mod registry;
pub mod service;
pub mod store;

pub use engine::{GenerationEngine, GenerationRequest, ProgressSink};
pub use registry::JobRegistry;
pub use service::GenerationService;
pub use store::{Artifact, ArtifactStore, LocalArtifactStore, StoreError};
