//! Imagine event bus.
//!
//! [`EventBus`] is the in-process publish/subscribe hub for job
//! transitions. The registry publishes; the WebSocket forwarder and any
//! other push consumer subscribe.

pub mod bus;

pub use bus::EventBus;
pub use imagine_core::job_events::JobEvent;
