//! Host resource telemetry.
//!
//! [`SystemMonitor`] samples CPU and memory use; [`start_telemetry`] pushes
//! a `telemetry` message to every WebSocket client on a fixed interval and
//! keeps the latest sample available to `GET /api/telemetry`.

pub mod broadcaster;
pub mod monitor;

pub use broadcaster::{start_telemetry, TELEMETRY_INTERVAL};
pub use monitor::{SystemMonitor, TelemetryMessage, TelemetrySample};
