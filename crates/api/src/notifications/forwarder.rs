//! Event-to-WebSocket fan-out.

use std::sync::Arc;

use axum::extract::ws::Message;
use imagine_events::JobEvent;
use imagine_pipeline::JobRegistry;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::ws::WsManager;

/// Forwards [`JobEvent`]s from the bus to all WebSocket connections.
///
/// Events are serialized once and broadcast; each connection has its own
/// unbounded channel, so per-job order on the bus is the order every
/// client sees. A client that was sent a `status` snapshot does not get
/// the events the snapshot already covers.
pub struct EventForwarder {
    ws_manager: Arc<WsManager>,
    registry: Arc<JobRegistry>,
}

impl EventForwarder {
    pub fn new(ws_manager: Arc<WsManager>, registry: Arc<JobRegistry>) -> Self {
        Self {
            ws_manager,
            registry,
        }
    }

    /// Run the forwarding loop.
    ///
    /// Exits when `cancel` fires or the bus is closed.
    pub async fn run(self, mut receiver: broadcast::Receiver<JobEvent>, cancel: CancellationToken) {
        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Event forwarder cancelled");
                    break;
                }
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) => self.forward(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    let resynced = self.ws_manager.resync_all(&self.registry).await;
                    tracing::warn!(skipped = n, resynced, "Event forwarder lagged, sent status to all clients");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event forwarder shutting down");
                    break;
                }
            }
        }
    }

    async fn forward(&self, event: &JobEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let delivered = self
                    .ws_manager
                    .broadcast_event(event, Message::Text(json.into()))
                    .await;
                tracing::debug!(
                    job_id = %event.job_id(),
                    event_type = event.msg_type(),
                    delivered,
                    "Forwarded job event",
                );
            }
            Err(e) => {
                tracing::error!(error = %e, job_id = %event.job_id(), "Failed to serialize job event");
            }
        }
    }
}
