//! Session Coordinator
//!
//! Stateful WebSocket synchronization server for planning-poker sessions.
//!
//! # Servers
//!
//! One HTTP listener (default: 0.0.0.0:8080) carries:
//! - `POST/GET /v1/sessions` - out-of-band session management
//! - `GET /v1/ws` - the WebSocket session protocol
//! - `GET /health`, `GET /ready` - operational probes
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Spawn the router actor (owns all registries)
//! 3. Spawn the liveness monitor
//! 4. Bind and serve the HTTP listener
//! 5. Wait for shutdown signal, then cancel via token fan-out

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use session_coordinator::config::Config;
use session_coordinator::handlers::{api_router, health_router, HealthState};
use session_coordinator::liveness::spawn_liveness_monitor;
use session_coordinator::router::{EventRouter, RouterConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Coordinator");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        sweep_interval_secs = config.sweep_interval.as_secs(),
        connection_timeout_secs = config.connection_timeout.as_secs(),
        session_timeout_secs = config.session_timeout.as_secs(),
        remove_participant_on_leave = config.remove_participant_on_leave,
        "Configuration loaded successfully"
    );

    // Spawn the router actor; every other component holds its handle.
    let shutdown_token = CancellationToken::new();
    let (router_handle, router_task) = EventRouter::spawn(
        RouterConfig {
            connection_timeout: config.connection_timeout,
            session_timeout: config.session_timeout,
            remove_participant_on_leave: config.remove_participant_on_leave,
        },
        shutdown_token.clone(),
    );
    info!("Event router started");

    // Spawn the liveness monitor as a sibling task.
    let monitor_task = spawn_liveness_monitor(
        router_handle.clone(),
        config.sweep_interval,
        shutdown_token.child_token(),
    );
    info!("Liveness monitor started");

    // Assemble the HTTP surface.
    let health_state = Arc::new(HealthState::new());
    let app = api_router(router_handle)
        .merge(health_router(Arc::clone(&health_state)))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    // Bind BEFORE marking ready to fail fast on bind errors.
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        format!("Failed to bind listener to {addr}: {e}")
    })?;
    info!(addr = %addr, "Listener bound successfully");
    health_state.set_ready();

    let server_shutdown_token = shutdown_token.child_token();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown_token.cancelled().await;
        info!("HTTP server shutting down");
    });

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });
    info!(addr = %addr, "Session Coordinator running - press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();
    shutdown_token.cancel();

    // Give the server, monitor and router time to wind down.
    let _ = tokio::time::timeout(Duration::from_secs(5), server_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), router_task).await;

    info!("Session Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
