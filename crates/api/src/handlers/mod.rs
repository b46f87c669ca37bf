pub mod artifacts;
pub mod command;
pub mod generation;
pub mod telemetry;
