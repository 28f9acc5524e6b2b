//! WebSocket endpoint - one task per connection.
//!
//! The socket task is a thin pump around the router: inbound frames are
//! parsed and dispatched to the router, outbound messages arrive on the
//! connection's queue and are written to the socket. Protocol errors
//! (malformed JSON, unknown kinds, messages out of state order) are
//! answered with an `error` notice to this socket only and never reach the
//! router.
//!
//! Queue ownership doubles as the transport-close mechanism: while the
//! connection is unjoined the task keeps its own sender, so a failed join
//! leaves the socket open for the client to act on the notice. A
//! successful join hands the only sender to the registry - from then on an
//! eviction drops it, the pump sees the closed queue, and the socket shuts
//! down.

use super::AppState;
use crate::registry::ConnectionId;
use crate::router::RouterHandle;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use poker_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Handler for `GET /v1/ws`.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.router))
}

/// What the select loop observed this iteration.
enum Next {
    Outbound(Option<ServerMessage>),
    Frame(Option<Result<Message, axum::Error>>),
}

/// Per-connection protocol state, tracked by the socket task.
struct ConnState {
    joined: bool,
    /// Our own sender, held while unjoined so the queue outlives failed
    /// join attempts. Dropped once the registry takes over.
    local_tx: Option<mpsc::UnboundedSender<ServerMessage>>,
}

/// Run one connection to completion.
#[instrument(skip_all, fields(connection_id = tracing::field::Empty))]
async fn handle_socket(mut socket: WebSocket, router: RouterHandle) {
    let connection_id = ConnectionId::new();
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));
    debug!(target: "poker.ws", connection_id = %connection_id, "Connection opened");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut state = ConnState {
        joined: false,
        local_tx: Some(outbound_tx),
    };

    loop {
        let next = tokio::select! {
            out = outbound_rx.recv() => Next::Outbound(out),
            frame = socket.recv() => Next::Frame(frame),
        };

        match next {
            Next::Outbound(Some(message)) => match serde_json::to_string(&message) {
                Ok(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(
                        target: "poker.ws",
                        connection_id = %connection_id,
                        error = %error,
                        "Failed to encode outbound message"
                    );
                }
            },

            // Every sender is gone; since we drop ours only on a
            // successful join, this means the registry evicted us. Close
            // the transport.
            Next::Outbound(None) => {
                debug!(
                    target: "poker.ws",
                    connection_id = %connection_id,
                    "Outbound queue closed, shutting down socket"
                );
                break;
            }

            Next::Frame(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        let keep_going =
                            dispatch(&router, connection_id, &mut state, &mut socket, message)
                                .await;
                        if !keep_going {
                            break;
                        }
                    }
                    Err(error) => {
                        debug!(
                            target: "poker.ws",
                            connection_id = %connection_id,
                            error = %error,
                            "Malformed inbound frame"
                        );
                        if send_error(&mut socket, "Malformed message").await.is_err() {
                            break;
                        }
                    }
                }
            }

            Next::Frame(Some(Ok(Message::Close(_)))) | Next::Frame(None) => break,

            // Binary frames are not part of the protocol; ping/pong is
            // handled by the library.
            Next::Frame(Some(Ok(_))) => {}

            Next::Frame(Some(Err(error))) => {
                debug!(
                    target: "poker.ws",
                    connection_id = %connection_id,
                    error = %error,
                    "Socket error"
                );
                break;
            }
        }
    }

    // Idempotent: a no-op for connections that never joined or were
    // already evicted.
    let _ = router.leave(connection_id).await;
    info!(target: "poker.ws", connection_id = %connection_id, "Connection closed");
}

/// Route one parsed client message. Returns false when the socket task
/// should exit.
async fn dispatch(
    router: &RouterHandle,
    connection_id: ConnectionId,
    state: &mut ConnState,
    socket: &mut WebSocket,
    message: ClientMessage,
) -> bool {
    match message {
        ClientMessage::Join {
            session_id,
            participant_id,
            display_name,
            ..
        } => {
            if state.joined {
                return send_error(socket, "Already joined").await.is_ok();
            }
            let Some(local_tx) = state.local_tx.as_ref() else {
                return false;
            };
            match router
                .join(
                    connection_id,
                    session_id,
                    participant_id,
                    display_name,
                    local_tx.clone(),
                )
                .await
            {
                Ok(true) => {
                    // The registry now owns delivery; an eviction closes
                    // the queue and with it this socket.
                    state.joined = true;
                    state.local_tx = None;
                    true
                }
                // Unjoined but alive: the session_not_found notice is
                // queued and the client decides what to do next.
                Ok(false) => true,
                Err(error) => {
                    warn!(
                        target: "poker.ws",
                        connection_id = %connection_id,
                        error = %error,
                        "Join dispatch failed"
                    );
                    false
                }
            }
        }

        ClientMessage::SyncEvent { event, .. } => {
            if !state.joined {
                return send_error(socket, "Not joined").await.is_ok();
            }
            router.event(connection_id, event).await.is_ok()
        }

        ClientMessage::Heartbeat { .. } => {
            if !state.joined {
                return send_error(socket, "Not joined").await.is_ok();
            }
            router.heartbeat(connection_id).await.is_ok()
        }

        ClientMessage::Leave { .. } => {
            // Explicit leave: tear down now; the caller breaks the loop and
            // the trailing leave() is a no-op.
            let _ = router.leave(connection_id).await;
            false
        }
    }
}

/// Send a generic `error` notice straight down this socket.
async fn send_error(socket: &mut WebSocket, message: &str) -> Result<(), axum::Error> {
    let notice = ServerMessage::Error {
        message: message.to_string(),
        ts: Utc::now(),
    };
    match serde_json::to_string(&notice) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(_) => Ok(()),
    }
}
