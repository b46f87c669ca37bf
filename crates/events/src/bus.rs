//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is designed to be shared via `Arc<EventBus>` across the
//! application. Publishing is synchronous and never blocks, so it is safe
//! to call while holding the registry lock.

use imagine_core::job_events::JobEvent;
use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobEvent`], in publish order.
///
/// # Usage
///
/// ```rust
/// use imagine_events::bus::EventBus;
/// use imagine_core::job_events::JobEvent;
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::Error { job_id: uuid::Uuid::nil(), error: "boom".into() });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// polling clients still see the state through the registry.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(job_id = %event.job_id(), kind = event.msg_type(), "Publishing job event");
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
