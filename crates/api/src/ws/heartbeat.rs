use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ws::manager::WsManager;

/// How often connected clients are pinged.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Ping all clients every `interval`, pruning connections that went away
/// without a Close frame. Runs until the handle is aborted.
pub fn start_heartbeat(ws_manager: Arc<WsManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let pruned = ws_manager.ping_all().await;
            let remaining = ws_manager.connection_count().await;
            if pruned > 0 {
                tracing::info!(pruned, remaining, "Pruned stale WebSocket connections");
            } else {
                tracing::debug!(remaining, "WebSocket heartbeat ping");
            }
        }
    })
}
