use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imagine_api::config::ServerConfig;
use imagine_api::notifications::EventForwarder;
use imagine_api::router::build_app_router;
use imagine_api::state::AppState;
use imagine_api::telemetry;
use imagine_api::ws;
use imagine_comfyui::ComfyUIEngine;
use imagine_pipeline::LocalArtifactStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "imagine_api=debug,imagine_pipeline=debug,imagine_comfyui=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Engine and artifact store ---
    tracing::info!(
        api_url = %config.comfyui.api_url,
        checkpoint = %config.comfyui.checkpoint,
        "Using ComfyUI engine",
    );
    let engine = Arc::new(ComfyUIEngine::new(config.comfyui.clone()));

    tracing::info!(
        artifact_dir = %config.generation.artifact_dir.display(),
        "Using local artifact store",
    );
    let store = Arc::new(LocalArtifactStore::new(config.generation.artifact_dir.clone()));

    // --- App state ---
    let state = AppState::new(config.clone(), engine, store);

    // --- Heartbeat ---
    let heartbeat_handle =
        ws::start_heartbeat(Arc::clone(&state.ws_manager), ws::HEARTBEAT_INTERVAL);

    // --- Telemetry push ---
    let telemetry_handle = telemetry::start_telemetry(
        Arc::clone(&state.telemetry),
        Arc::clone(&state.ws_manager),
        Duration::from_secs(config.telemetry_interval_secs),
    );

    // --- Event forwarding (bus -> WebSocket clients) ---
    let forwarder_cancel = CancellationToken::new();
    let forwarder_handle = tokio::spawn(
        EventForwarder::new(Arc::clone(&state.ws_manager), Arc::clone(&state.registry))
            .run(state.event_bus.subscribe(), forwarder_cancel.clone()),
    );
    tracing::info!("Event forwarder started");

    let generation = Arc::clone(&state.generation);
    let ws_manager = Arc::clone(&state.ws_manager);

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop in-flight generations first so their terminal events still reach clients.
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(shutdown_timeout, generation.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Generation runs did not stop in time");
    }

    forwarder_cancel.cancel();
    if tokio::time::timeout(shutdown_timeout, forwarder_handle)
        .await
        .is_err()
    {
        tracing::warn!("Event forwarder did not stop in time");
    }
    tracing::info!("Event forwarder stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    telemetry_handle.abort();
    tracing::info!("Heartbeat and telemetry tasks stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
