//! Registry of open `/ws` connections.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use imagine_core::job::JobMark;
use imagine_core::job_events::JobEvent;
use imagine_core::types::{JobId, Timestamp};
use imagine_pipeline::JobRegistry;
use tokio::sync::{mpsc, RwLock};

use crate::ws::protocol::StatusMessage;

/// Outbound half of a connection's queue.
pub type WsSender = mpsc::UnboundedSender<Message>;

pub struct WsConnection {
    pub sender: WsSender,
    pub connected_at: Timestamp,
    /// The job state this client was last shown by a `status` message.
    /// Job events at or behind it are not delivered.
    seen: Option<(JobId, JobMark)>,
}

impl WsConnection {
    fn is_behind(&self, event: &JobEvent) -> bool {
        self.seen
            .is_some_and(|(job_id, mark)| job_id == event.job_id() && event.mark() <= mark)
    }
}

/// All push-channel clients, keyed by connection id.
///
/// Each connection gets an unbounded queue drained by its own socket task,
/// so a slow client only delays itself and never loses a job event.
/// Wrap in `Arc` to share between handlers, the forwarder and the heartbeat.
#[derive(Default)]
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn_id` and hand back the queue its socket task drains.
    pub async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (sender, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            sender,
            connected_at: chrono::Utc::now(),
            seen: None,
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Queue `message` for every client. Returns how many queues accepted it.
    pub async fn broadcast(&self, message: Message) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Queue a serialized job event for every client that has not already
    /// seen a newer state of that job. Returns how many queues accepted it.
    pub async fn broadcast_event(&self, event: &JobEvent, message: Message) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| !conn.is_behind(event))
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Queue a `status` message for one client.
    ///
    /// The snapshot is read while the connection table is write-locked, so
    /// no job event can be queued between reading it and queueing it. Events
    /// published before the read and still in flight are then dropped for
    /// this client by [`broadcast_event`](Self::broadcast_event).
    pub async fn send_status(
        &self,
        conn_id: &str,
        registry: &JobRegistry,
        job_id: Option<&str>,
    ) -> bool {
        let mut conns = self.connections.write().await;
        let Some(conn) = conns.get_mut(conn_id) else {
            return false;
        };
        queue_status(conn, StatusMessage::for_request(registry, job_id))
    }

    /// Queue a `status` message with the latest job for every client.
    ///
    /// Used after the forwarder fell behind the bus and events were lost.
    pub async fn resync_all(&self, registry: &JobRegistry) -> usize {
        let mut conns = self.connections.write().await;
        let status = StatusMessage::for_request(registry, None);
        conns
            .values_mut()
            .map(|conn| queue_status(conn, status.clone()))
            .filter(|queued| *queued)
            .count()
    }

    /// Queue `message` for one client. `false` if it is gone.
    pub async fn send_to(&self, conn_id: &str, message: Message) -> bool {
        self.connections
            .read()
            .await
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connected_at(&self, conn_id: &str) -> Option<Timestamp> {
        self.connections
            .read()
            .await
            .get(conn_id)
            .map(|conn| conn.connected_at)
    }

    /// Ping every client and drop those whose socket task has exited.
    ///
    /// Returns the number of connections dropped.
    pub async fn ping_all(&self) -> usize {
        let mut conns = self.connections.write().await;
        let before = conns.len();
        conns.retain(|_, conn| conn.sender.send(Message::Ping(Bytes::new())).is_ok());
        before - conns.len()
    }

    /// Queue a Close frame for every client and forget them all.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        tracing::info!(count = conns.len(), "Closed all WebSocket connections");
        conns.clear();
    }
}

fn queue_status(conn: &mut WsConnection, status: StatusMessage) -> bool {
    let json = match serde_json::to_string(&status) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize status message");
            return false;
        }
    };
    if let Some(job) = &status.job {
        let mark = job.mark();
        conn.seen = match conn.seen {
            Some((job_id, seen)) if job_id == job.job_id && seen > mark => Some((job_id, seen)),
            _ => Some((job.job_id, mark)),
        };
    }
    conn.sender.send(Message::Text(json.into())).is_ok()
}
