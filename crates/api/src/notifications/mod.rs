//! Job event delivery to WebSocket clients.
//!
//! The [`EventForwarder`] subscribes to the event bus and writes every job
//! event to every connected client.

pub mod forwarder;

pub use forwarder::EventForwarder;
