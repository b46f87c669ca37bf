use std::sync::{Mutex, PoisonError, RwLock};

use imagine_core::job_events::MSG_TYPE_TELEMETRY;
use imagine_core::types::Timestamp;
use serde::Serialize;
use sysinfo::System;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One reading of host CPU and memory use.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Average over all cores since the previous sample, `0.0..=100.0`.
    pub cpu_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub memory_percent: f64,
    pub sampled_at: Timestamp,
}

impl TelemetrySample {
    fn read(system: &System) -> Self {
        let used = system.used_memory() as f64;
        let total = system.total_memory() as f64;
        let memory_percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };
        Self {
            cpu_percent: round_to(f64::from(system.global_cpu_usage()).max(0.0).min(100.0), 1),
            memory_used_gb: round_to(used / BYTES_PER_GB, 2),
            memory_total_gb: round_to(total / BYTES_PER_GB, 2),
            memory_percent: round_to(memory_percent, 1),
            sampled_at: chrono::Utc::now(),
        }
    }
}

/// The `telemetry` push message, sample fields at the top level.
#[derive(Debug, Serialize)]
pub struct TelemetryMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(flatten)]
    pub sample: &'a TelemetrySample,
}

impl<'a> TelemetryMessage<'a> {
    pub fn new(sample: &'a TelemetrySample) -> Self {
        Self {
            msg_type: MSG_TYPE_TELEMETRY,
            sample,
        }
    }
}

/// Samples the host and remembers the most recent reading.
///
/// Sampling does blocking system calls; async callers should go through
/// `tokio::task::spawn_blocking`.
pub struct SystemMonitor {
    system: Mutex<System>,
    latest: RwLock<Option<TelemetrySample>>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta, so the first refresh only sets the baseline.
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            latest: RwLock::new(None),
        }
    }

    /// Take a fresh sample and make it the latest.
    pub fn sample(&self) -> TelemetrySample {
        let sample = {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_cpu_usage();
            system.refresh_memory();
            TelemetrySample::read(&system)
        };
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(sample.clone());
        sample
    }

    pub fn latest(&self) -> Option<TelemetrySample> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
