//! Coordinator error types.
//!
//! Registry failures cross the router boundary as values, never as panics:
//! the router decides per call whether the right response is silence, a
//! notice to the offending connection, or nothing at all. Internal details
//! are logged server-side but not exposed to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Coordinator error type.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The target session does not exist (or has already expired).
    #[error("Session not found")]
    SessionNotFound,

    /// A vote or reveal arrived while no round is active.
    #[error("No active round")]
    NoActiveRound,

    /// A vote arrived after the round was revealed.
    #[error("Round already revealed")]
    RoundAlreadyRevealed,

    /// The referenced participant is not on the session roster.
    #[error("Participant not found")]
    ParticipantNotFound,

    /// Malformed or out-of-order protocol input.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Actor mailbox send/receive failure (coordinator shutting down).
    #[error("Mailbox error: {0}")]
    Mailbox(String),
}

impl CoordinatorError {
    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::SessionNotFound => "Session not found".to_string(),
            CoordinatorError::NoActiveRound => "No voting round is active".to_string(),
            CoordinatorError::RoundAlreadyRevealed => {
                "The current round has already been revealed".to_string()
            }
            CoordinatorError::ParticipantNotFound => "Participant not found".to_string(),
            CoordinatorError::Protocol(msg) => msg.clone(),
            CoordinatorError::Mailbox(_) => "The coordinator is shutting down".to_string(),
        }
    }

    /// HTTP status for API surfaces.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoordinatorError::SessionNotFound | CoordinatorError::ParticipantNotFound => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::NoActiveRound
            | CoordinatorError::RoundAlreadyRevealed
            | CoordinatorError::Protocol(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Mailbox(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.client_message() }));
        (self.status_code(), body).into_response()
    }
}
