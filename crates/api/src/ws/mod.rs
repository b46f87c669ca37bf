//! WebSocket infrastructure for the push channel.
//!
//! Provides connection management, heartbeat monitoring, the client
//! message protocol and the HTTP upgrade handler.

mod handler;
mod heartbeat;
pub mod manager;
pub mod protocol;

pub use handler::ws_handler;
pub use heartbeat::{start_heartbeat, HEARTBEAT_INTERVAL};
pub use manager::WsManager;
