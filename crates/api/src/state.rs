use std::sync::Arc;

use imagine_events::EventBus;
use imagine_pipeline::{ArtifactStore, GenerationEngine, GenerationService, JobRegistry};

use crate::config::ServerConfig;
use crate::telemetry::SystemMonitor;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (every field is behind an `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Authoritative job state; also reachable through `generation`.
    pub registry: Arc<JobRegistry>,
    /// Submits and runs jobs against the engine.
    pub generation: Arc<GenerationService>,
    /// Where finished images are read back from for `/artifacts/{file}`.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Job event bus the registry publishes on.
    pub event_bus: Arc<EventBus>,
    /// Host CPU / memory sampler.
    pub telemetry: Arc<SystemMonitor>,
}

impl AppState {
    /// Wire the registry, generation service and connection manager around
    /// the given engine and store.
    pub fn new(
        config: ServerConfig,
        engine: Arc<dyn GenerationEngine>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&event_bus),
            config.generation.max_steps,
            config.generation.history_limit,
        ));
        let generation = Arc::new(GenerationService::new(
            Arc::clone(&registry),
            engine,
            Arc::clone(&artifacts),
            config.generation.timeout,
        ));

        Self {
            config: Arc::new(config),
            registry,
            generation,
            artifacts,
            ws_manager: Arc::new(WsManager::new()),
            event_bus,
            telemetry: Arc::new(SystemMonitor::new()),
        }
    }
}
