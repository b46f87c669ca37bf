use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use imagine_comfyui::ComfyUISettings;
use imagine_core::validation::DEFAULT_MAX_STEPS;
use imagine_pipeline::registry::DEFAULT_HISTORY_LIMIT;
use serde::Serialize;

use crate::telemetry::TELEMETRY_INTERVAL;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a single local demo machine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background tasks, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Period of the `telemetry` push, in seconds (default: `1`).
    pub telemetry_interval_secs: u64,
    pub generation: GenerationConfig,
    pub comfyui: ComfyUISettings,
    pub platform: PlatformInfo,
}

/// Job execution limits and artifact location.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub artifact_dir: PathBuf,
    /// Wall-clock budget for one generation.
    pub timeout: Duration,
    /// Jobs retained in memory.
    pub history_limit: usize,
    /// Upper bound on `steps` per job.
    pub max_steps: u32,
}

/// Static platform labels reported by `GET /info`.
///
/// These are operator-supplied; nothing is detected at runtime.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    pub platform: String,
    pub processor: String,
    pub architecture: String,
    pub ai_acceleration: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                              |
    /// |---------------------------|--------------------------------------|
    /// | `HOST`                    | `0.0.0.0`                            |
    /// | `PORT`                    | `5000`                               |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`              |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                                 |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`                                 |
    /// | `TELEMETRY_INTERVAL_SECS` | `1`                                  |
    /// | `ARTIFACT_DIR`            | `static/generated`                   |
    /// | `GENERATION_TIMEOUT_SECS` | `300`                                |
    /// | `JOB_HISTORY_LIMIT`       | `50`                                 |
    /// | `MAX_STEPS`               | `150`                                |
    /// | `COMFYUI_URL`             | `http://127.0.0.1:8188`              |
    /// | `COMFYUI_WS_URL`          | derived from `COMFYUI_URL`           |
    /// | `COMFYUI_CHECKPOINT`      | `sd_xl_turbo_1.0_fp16.safetensors`   |
    /// | `PLATFORM_TYPE`           | `Unknown`                            |
    /// | `PROCESSOR_MODEL`         | `Unknown`                            |
    /// | `ARCHITECTURE`            | `Unknown`                            |
    /// | `AI_ACCELERATION`         | `Unknown`                            |
    ///
    /// Panics on unparsable numeric values so misconfiguration fails at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_parse("PORT", 5000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_parse("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs: u64 = env_parse("SHUTDOWN_TIMEOUT_SECS", 30);
        let telemetry_interval_secs: u64 = env_parse("TELEMETRY_INTERVAL_SECS", TELEMETRY_INTERVAL.as_secs()).max(1);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            telemetry_interval_secs,
            generation: GenerationConfig::from_env(),
            comfyui: comfyui_from_env(),
            platform: PlatformInfo::from_env(),
        }
    }
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        Self {
            artifact_dir: std::env::var("ARTIFACT_DIR")
                .unwrap_or_else(|_| "static/generated".into())
                .into(),
            timeout: Duration::from_secs(env_parse("GENERATION_TIMEOUT_SECS", 300)),
            history_limit: env_parse("JOB_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT),
            max_steps: env_parse("MAX_STEPS", DEFAULT_MAX_STEPS),
        }
    }
}

impl PlatformInfo {
    pub fn from_env() -> Self {
        let label = |key: &str| std::env::var(key).unwrap_or_else(|_| "Unknown".into());
        Self {
            platform: label("PLATFORM_TYPE"),
            processor: label("PROCESSOR_MODEL"),
            architecture: label("ARCHITECTURE"),
            ai_acceleration: label("AI_ACCELERATION"),
        }
    }
}

fn comfyui_from_env() -> ComfyUISettings {
    let defaults = ComfyUISettings::default();
    ComfyUISettings {
        api_url: std::env::var("COMFYUI_URL").unwrap_or(defaults.api_url),
        ws_url: std::env::var("COMFYUI_WS_URL").ok(),
        checkpoint: std::env::var("COMFYUI_CHECKPOINT").unwrap_or(defaults.checkpoint),
        ..defaults
    }
}

/// Read and parse `key`, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid value: {e}")),
        Err(_) => default,
    }
}
