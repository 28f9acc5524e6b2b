//! HTTP and WebSocket surface.
//!
//! - [`sessions`] - out-of-band session creation and listing, used by the
//!   presentation layer before any socket exists
//! - [`ws`] - the socket endpoint carrying the session protocol
//! - [`health`] - operational liveness/readiness probes

pub mod health;
pub mod sessions;
pub mod ws;

use crate::router::RouterHandle;
use axum::routing::{get, post};
use axum::Router;

pub use health::{health_router, HealthState};

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: RouterHandle,
}

/// Create the API router: session management plus the socket endpoint.
pub fn api_router(router: RouterHandle) -> Router {
    Router::new()
        .route(
            "/v1/sessions",
            post(sessions::create_session).get(sessions::list_sessions),
        )
        .route("/v1/ws", get(ws::ws_upgrade))
        .with_state(AppState { router })
}
