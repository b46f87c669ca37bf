use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::telemetry::monitor::{SystemMonitor, TelemetryMessage};
use crate::ws::WsManager;

/// How often the host is sampled and clients are sent `telemetry`.
pub const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Sample the host every `interval` and push the reading to every client.
/// Runs until the handle is aborted.
pub fn start_telemetry(
    monitor: Arc<SystemMonitor>,
    ws_manager: Arc<WsManager>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let sampler = Arc::clone(&monitor);
            let sample = match tokio::task::spawn_blocking(move || sampler.sample()).await {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::warn!(error = %e, "Telemetry sampling failed");
                    continue;
                }
            };

            match serde_json::to_string(&TelemetryMessage::new(&sample)) {
                Ok(json) => {
                    let delivered = ws_manager.broadcast(Message::Text(json.into())).await;
                    tracing::trace!(
                        cpu_percent = sample.cpu_percent,
                        memory_percent = sample.memory_percent,
                        delivered,
                        "Telemetry sent",
                    );
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize telemetry"),
            }
        }
    })
}
