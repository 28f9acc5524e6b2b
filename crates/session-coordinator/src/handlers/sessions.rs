//! Session management handlers.
//!
//! Session creation happens out-of-band of the socket protocol: the
//! presentation layer creates a session over plain HTTP, shares the id,
//! and participants then join over the socket.

use super::AppState;
use crate::errors::CoordinatorError;
use axum::{extract::State, http::StatusCode, Json};
use poker_protocol::{ParticipantId, Session, SessionSummary};
use serde::Deserialize;
use tracing::{info, instrument};

/// Request body for `POST /v1/sessions`.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    pub facilitator_id: ParticipantId,
    pub facilitator_name: String,
}

/// Handler for `POST /v1/sessions`.
///
/// Creates a session with the caller as facilitator, seeded online on the
/// roster. Returns the full session record.
#[instrument(skip_all, fields(session_name = %request.name))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), CoordinatorError> {
    let session = state
        .router
        .create_session(
            request.name,
            request.facilitator_id,
            request.facilitator_name,
        )
        .await?;

    info!(
        target: "poker.handlers.sessions",
        session_id = %session.id,
        "Session created via API"
    );

    Ok((StatusCode::CREATED, Json(session)))
}

/// Handler for `GET /v1/sessions`.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSummary>>, CoordinatorError> {
    let summaries = state.router.list_sessions().await?;
    Ok(Json(summaries))
}
