//! Imagine API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! WebSocket infrastructure) so integration tests and the binary
//! entrypoint share them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod notifications;
pub mod query;
pub mod router;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod ws;
