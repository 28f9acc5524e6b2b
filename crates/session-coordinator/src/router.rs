//! `EventRouter` - the protocol state machine.
//!
//! The router actor owns both registries and processes one inbound message
//! to completion (registry mutation + broadcast fan-out) before the next,
//! so the mailbox is the single serialization point and no registry needs a
//! lock. Broadcast sends are fire-and-forget through each connection's
//! outbound queue; a stalled socket never stalls the session.
//!
//! Per-connection protocol states: `unjoined -> joined -> closed`. A
//! connection becomes joined when its `join` names a live session, loops on
//! domain events and heartbeats, and closes on explicit leave or transport
//! close. `closed` is terminal for a connection id; reconnects arrive with
//! a fresh id.

use crate::errors::CoordinatorError;
use crate::registry::{ConnectionId, ConnectionRecord, ConnectionRegistry, SessionRegistry};

use chrono::Utc;
use poker_protocol::{
    DomainEvent, Participant, ParticipantId, ServerMessage, Session, SessionId, SessionSummary,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the router mailbox.
const ROUTER_CHANNEL_BUFFER: usize = 500;

/// Router tuning knobs, taken from the service [`Config`](crate::config::Config).
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Connections silent longer than this are evicted by a sweep.
    pub connection_timeout: Duration,
    /// Sessions inactive longer than this are deleted by a sweep.
    pub session_timeout: Duration,
    /// Leave policy: remove the roster entry (and prune the in-round vote)
    /// instead of marking it offline.
    pub remove_participant_on_leave: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            session_timeout: Duration::from_secs(900),
            remove_participant_on_leave: false,
        }
    }
}

/// Result of one liveness sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub connections_evicted: usize,
    pub sessions_evicted: usize,
}

/// Messages handled by the router actor.
enum RouterMessage {
    Join {
        connection_id: ConnectionId,
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: String,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        respond_to: oneshot::Sender<bool>,
    },
    Event {
        connection_id: ConnectionId,
        event: DomainEvent,
    },
    Heartbeat {
        connection_id: ConnectionId,
    },
    Leave {
        connection_id: ConnectionId,
    },
    CreateSession {
        name: String,
        facilitator_id: ParticipantId,
        facilitator_name: String,
        respond_to: oneshot::Sender<Session>,
    },
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionSummary>>,
    },
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<Session>>,
    },
    Sweep {
        respond_to: oneshot::Sender<SweepReport>,
    },
}

/// Handle to the router actor.
#[derive(Clone)]
pub struct RouterHandle {
    sender: mpsc::Sender<RouterMessage>,
    cancel_token: CancellationToken,
}

impl RouterHandle {
    /// Attach a connection to a session.
    ///
    /// Returns `true` if the connection is now joined. On a nonexistent
    /// session the router sends the distinguished `session_not_found`
    /// notice through `outbound` and returns `false`; the connection stays
    /// unjoined and unregistered.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: String,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<bool, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RouterMessage::Join {
                connection_id,
                session_id,
                participant_id,
                display_name,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Submit a domain event from a joined connection.
    pub async fn event(
        &self,
        connection_id: ConnectionId,
        event: DomainEvent,
    ) -> Result<(), CoordinatorError> {
        self.sender
            .send(RouterMessage::Event {
                connection_id,
                event,
            })
            .await
            .map_err(|e| CoordinatorError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Refresh a connection's heartbeat.
    pub async fn heartbeat(&self, connection_id: ConnectionId) -> Result<(), CoordinatorError> {
        self.sender
            .send(RouterMessage::Heartbeat { connection_id })
            .await
            .map_err(|e| CoordinatorError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Close a connection: explicit leave and transport close share this
    /// path. Safe to call for never-joined or already-closed connections.
    pub async fn leave(&self, connection_id: ConnectionId) -> Result<(), CoordinatorError> {
        self.sender
            .send(RouterMessage::Leave { connection_id })
            .await
            .map_err(|e| CoordinatorError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Create a session out-of-band of the socket protocol.
    pub async fn create_session(
        &self,
        name: String,
        facilitator_id: ParticipantId,
        facilitator_name: String,
    ) -> Result<Session, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RouterMessage::CreateSession {
                name,
                facilitator_id,
                facilitator_name,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Condensed views of every active session.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RouterMessage::ListSessions { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Snapshot of one session, if it is still live.
    pub async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Session>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RouterMessage::GetSession {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Run one liveness sweep: stale connections first, then inactive
    /// sessions.
    pub async fn sweep(&self) -> Result<SweepReport, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RouterMessage::Sweep { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Cancel the router actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for dependent tasks.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `EventRouter` implementation.
pub struct EventRouter {
    receiver: mpsc::Receiver<RouterMessage>,
    cancel_token: CancellationToken,
    config: RouterConfig,
    sessions: SessionRegistry,
    connections: ConnectionRegistry,
}

impl EventRouter {
    /// Spawn the router actor.
    ///
    /// The registries are constructed here and owned exclusively by the
    /// actor task; nothing outside it ever writes registry state.
    pub fn spawn(
        config: RouterConfig,
        cancel_token: CancellationToken,
    ) -> (RouterHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROUTER_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            config,
            sessions: SessionRegistry::new(),
            connections: ConnectionRegistry::new(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RouterHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "poker.router")]
    async fn run(mut self) {
        info!(target: "poker.router", "EventRouter started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "poker.router", "EventRouter received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(target: "poker.router", "EventRouter channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "poker.router",
            sessions = self.sessions.len(),
            connections = self.connections.len(),
            "EventRouter stopped"
        );
    }

    /// Handle a single message to completion.
    fn handle_message(&mut self, message: RouterMessage) {
        match message {
            RouterMessage::Join {
                connection_id,
                session_id,
                participant_id,
                display_name,
                outbound,
                respond_to,
            } => {
                let joined = self.handle_join(
                    connection_id,
                    session_id,
                    participant_id,
                    display_name,
                    &outbound,
                );
                let _ = respond_to.send(joined);
            }

            RouterMessage::Event {
                connection_id,
                event,
            } => {
                self.handle_event(connection_id, event);
            }

            RouterMessage::Heartbeat { connection_id } => {
                if self.connections.touch_heartbeat(connection_id) {
                    if let Some(record) = self.connections.lookup(connection_id) {
                        record.send(ServerMessage::HeartbeatAck { ts: Utc::now() });
                    }
                }
            }

            RouterMessage::Leave { connection_id } => {
                if let Some(record) = self.connections.unregister(connection_id) {
                    self.apply_leave(&record);
                }
            }

            RouterMessage::CreateSession {
                name,
                facilitator_id,
                facilitator_name,
                respond_to,
            } => {
                let session = self
                    .sessions
                    .create_session(name, facilitator_id, facilitator_name);
                info!(
                    target: "poker.router",
                    session_id = %session.id,
                    facilitator_id = %facilitator_id,
                    "Session created"
                );
                let _ = respond_to.send(session);
            }

            RouterMessage::ListSessions { respond_to } => {
                let _ = respond_to.send(self.sessions.list_summaries());
            }

            RouterMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.sessions.get(session_id).cloned());
            }

            RouterMessage::Sweep { respond_to } => {
                let report = self.handle_sweep();
                let _ = respond_to.send(report);
            }
        }
    }

    /// Handle a join request. Returns whether the connection is now joined.
    #[instrument(skip_all, fields(session_id = %session_id, participant_id = %participant_id))]
    fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: String,
        outbound: &mpsc::UnboundedSender<ServerMessage>,
    ) -> bool {
        if self.sessions.get(session_id).is_none() {
            // Distinguished notice: the client should drop its stale
            // session reference instead of retrying.
            debug!(target: "poker.router", "Join targeting unknown session");
            let _ = outbound.send(ServerMessage::SessionNotFound {
                message: "Session not found".to_string(),
                ts: Utc::now(),
            });
            return false;
        }

        let restored = match self.sessions.add_or_restore_participant(
            session_id,
            Participant::new(participant_id, display_name.clone()),
        ) {
            Ok(restored) => restored,
            Err(error) => {
                warn!(target: "poker.router", error = %error, "Join failed");
                let _ = outbound.send(ServerMessage::Error {
                    message: error.client_message(),
                    ts: Utc::now(),
                });
                return false;
            }
        };

        self.connections.register(
            connection_id,
            session_id,
            participant_id,
            display_name,
            outbound.clone(),
        );

        // The joiner gets the authoritative snapshot directly; everyone
        // else gets the roster notice. Echoing the join back to its
        // originator would be redundant, so it is excluded.
        if let Some(session) = self.sessions.get(session_id) {
            let _ = outbound.send(ServerMessage::Joined {
                session: session.clone(),
                ts: Utc::now(),
            });
        }
        self.broadcast(
            session_id,
            DomainEvent::ParticipantJoined {
                participant: restored,
            },
            Some(connection_id),
        );

        info!(
            target: "poker.router",
            connection_id = %connection_id,
            "Participant joined"
        );
        true
    }

    /// Validate and apply a domain event, then fan it out.
    fn handle_event(&mut self, connection_id: ConnectionId, event: DomainEvent) {
        let Some(record) = self.connections.lookup(connection_id) else {
            // Late event racing a closed/evicted connection.
            debug!(
                target: "poker.router",
                connection_id = %connection_id,
                "Event from unregistered connection ignored"
            );
            return;
        };
        let session_id = record.session_id;

        match event {
            DomainEvent::VoteCast {
                participant_id,
                vote,
            } => match self.sessions.record_vote(session_id, participant_id, vote.clone()) {
                Ok(()) => {
                    self.broadcast(
                        session_id,
                        DomainEvent::VoteCast {
                            participant_id,
                            vote,
                        },
                        None,
                    );
                }
                Err(error) => {
                    // Typically a race between a late vote and a round
                    // change; nothing to surface.
                    debug!(target: "poker.router", error = %error, "Vote not recorded");
                }
            },

            DomainEvent::RoundStarted { issue_label, .. } => {
                match self.sessions.start_round(session_id, issue_label.clone()) {
                    Ok(round) => {
                        self.broadcast(
                            session_id,
                            DomainEvent::RoundStarted {
                                issue_label,
                                round: Some(round),
                            },
                            None,
                        );
                    }
                    Err(error) => {
                        debug!(target: "poker.router", error = %error, "Round not started");
                    }
                }
            }

            DomainEvent::VotesRevealed { .. } => match self.sessions.reveal_round(session_id) {
                Ok(round) => {
                    // The broadcast carries the server-computed statistics.
                    self.broadcast(
                        session_id,
                        DomainEvent::VotesRevealed { round: Some(round) },
                        None,
                    );
                }
                Err(error) => {
                    debug!(target: "poker.router", error = %error, "Round not revealed");
                }
            },

            DomainEvent::SettingsChanged {
                settings,
                facilitator,
                name,
                voting_system,
            } => {
                match self.sessions.apply_settings(
                    session_id,
                    settings.as_ref(),
                    facilitator,
                    name.clone(),
                    voting_system,
                ) {
                    Ok(()) => {
                        self.broadcast(
                            session_id,
                            DomainEvent::SettingsChanged {
                                settings,
                                facilitator,
                                name,
                                voting_system,
                            },
                            None,
                        );
                    }
                    Err(error) => {
                        debug!(target: "poker.router", error = %error, "Settings not applied");
                    }
                }
            }

            DomainEvent::ParticipantLeft { participant_id } => {
                // Explicit roster leave, distinct from transport close: the
                // connection stays registered until the socket goes away.
                match self.apply_roster_leave(session_id, participant_id) {
                    Ok(()) => {
                        self.broadcast(
                            session_id,
                            DomainEvent::ParticipantLeft { participant_id },
                            None,
                        );
                    }
                    Err(error) => {
                        debug!(target: "poker.router", error = %error, "Roster leave ignored");
                    }
                }
            }

            // Pure relay: no registry mutation, everyone (sender included)
            // receives the signal.
            DomainEvent::Cosmetic { payload } => {
                self.broadcast(session_id, DomainEvent::Cosmetic { payload }, None);
            }

            DomainEvent::ParticipantJoined { .. } => {
                // Coordinator-originated kind; a client sending it is
                // misbehaving but harmless.
                warn!(
                    target: "poker.router",
                    connection_id = %connection_id,
                    "Ignoring client-sent participant_joined"
                );
            }
        }
    }

    /// Shared close path for explicit leave, transport close, and liveness
    /// eviction: roster mutation plus the departure broadcast.
    fn apply_leave(&mut self, record: &ConnectionRecord) {
        // A reconnect race may have already registered a newer connection
        // for this participant; if so the roster entry must stay online.
        if self
            .connections
            .participant_connection(record.session_id, record.participant_id)
            .is_some()
        {
            debug!(
                target: "poker.router",
                connection_id = %record.id,
                participant_id = %record.participant_id,
                "Connection closed but participant has a newer connection"
            );
            return;
        }

        match self.apply_roster_leave(record.session_id, record.participant_id) {
            Ok(()) => {
                self.broadcast(
                    record.session_id,
                    DomainEvent::ParticipantLeft {
                        participant_id: record.participant_id,
                    },
                    None,
                );
                info!(
                    target: "poker.router",
                    connection_id = %record.id,
                    participant_id = %record.participant_id,
                    "Participant disconnected"
                );
            }
            Err(error) => {
                // The session may have expired before the connection did.
                debug!(target: "poker.router", error = %error, "Leave on missing session");
            }
        }
    }

    /// Apply the configured roster policy for a departing participant.
    fn apply_roster_leave(
        &mut self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<(), CoordinatorError> {
        if self.config.remove_participant_on_leave {
            self.sessions.remove_participant(session_id, participant_id)
        } else {
            self.sessions
                .mark_participant_offline(session_id, participant_id)
        }
    }

    /// One liveness sweep: evict silent connections (each producing the
    /// same departure notice an explicit close would), then delete
    /// inactive sessions (no one left to notify).
    fn handle_sweep(&mut self) -> SweepReport {
        let evicted = self.connections.sweep_stale(self.config.connection_timeout);
        for record in &evicted {
            self.apply_leave(record);
        }

        let sessions_evicted = self.sessions.sweep_inactive(self.config.session_timeout);

        if !evicted.is_empty() || sessions_evicted > 0 {
            info!(
                target: "poker.router",
                connections_evicted = evicted.len(),
                sessions_evicted,
                "Liveness sweep evicted state"
            );
        }

        SweepReport {
            connections_evicted: evicted.len(),
            sessions_evicted,
        }
    }

    /// Send a domain event to every joined connection in the session,
    /// optionally excluding one. Per-recipient failures are ignored so one
    /// dead socket never aborts the fan-out.
    fn broadcast(&self, session_id: SessionId, event: DomainEvent, exclude: Option<ConnectionId>) {
        let message = ServerMessage::SyncEvent {
            event,
            ts: Utc::now(),
        };
        for record in self.connections.list_by_session(session_id) {
            if Some(record.id) == exclude {
                continue;
            }
            record.send(message.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use poker_protocol::Vote;

    async fn spawn_router() -> RouterHandle {
        let (handle, _task) = EventRouter::spawn(RouterConfig::default(), CancellationToken::new());
        handle
    }

    async fn join_new_connection(
        handle: &RouterHandle,
        session_id: SessionId,
        name: &str,
    ) -> (
        ConnectionId,
        ParticipantId,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        let connection_id = ConnectionId::new();
        let participant_id = ParticipantId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let joined = handle
            .join(connection_id, session_id, participant_id, name.to_string(), tx)
            .await
            .unwrap();
        assert!(joined);
        (connection_id, participant_id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Flush the mailbox so fire-and-forget events are fully applied before
    /// assertions.
    async fn flush(handle: &RouterHandle) {
        let _ = handle.list_sessions().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_unknown_session_gets_distinguished_notice() {
        let handle = spawn_router().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let joined = handle
            .join(
                ConnectionId::new(),
                SessionId::new(),
                ParticipantId::new(),
                "Ghost".to_string(),
                tx,
            )
            .await
            .unwrap();

        assert!(!joined);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages.first(),
            Some(ServerMessage::SessionNotFound { .. })
        ));
        // No residual roster mutation anywhere.
        assert!(handle.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_gets_snapshot_and_others_get_notice() {
        let handle = spawn_router().await;
        let session = handle
            .create_session("Sprint 4".to_string(), ParticipantId::new(), "Alice".to_string())
            .await
            .unwrap();

        let (_, alice_id, mut alice_rx) =
            join_new_connection(&handle, session.id, "Alice").await;
        let (_, _, mut bob_rx) = join_new_connection(&handle, session.id, "Bob").await;
        flush(&handle).await;

        // Alice: her own joined ack, then Bob's roster notice. Her own join
        // is not echoed back.
        let alice_messages = drain(&mut alice_rx);
        assert!(matches!(
            alice_messages.first(),
            Some(ServerMessage::Joined { session, .. })
                if session.participant(alice_id).is_some()
        ));
        assert!(alice_messages.iter().any(|m| matches!(
            m,
            ServerMessage::SyncEvent {
                event: DomainEvent::ParticipantJoined { .. },
                ..
            }
        )));

        // Bob: only his joined ack (he was the originator of the notice).
        let bob_messages = drain(&mut bob_rx);
        assert_eq!(bob_messages.len(), 1);
        assert!(matches!(
            bob_messages.first(),
            Some(ServerMessage::Joined { .. })
        ));
    }

    #[tokio::test]
    async fn test_vote_broadcast_reaches_everyone_exactly_once() {
        let handle = spawn_router().await;
        let session = handle
            .create_session("Sprint".to_string(), ParticipantId::new(), "Alice".to_string())
            .await
            .unwrap();

        let (alice_conn, alice_id, mut alice_rx) =
            join_new_connection(&handle, session.id, "Alice").await;
        let (_, _, mut bob_rx) = join_new_connection(&handle, session.id, "Bob").await;
        let (_, _, mut carol_rx) = join_new_connection(&handle, session.id, "Carol").await;

        handle
            .event(
                alice_conn,
                DomainEvent::RoundStarted {
                    issue_label: None,
                    round: None,
                },
            )
            .await
            .unwrap();
        flush(&handle).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        handle
            .event(
                alice_conn,
                DomainEvent::VoteCast {
                    participant_id: alice_id,
                    vote: Vote::from("5"),
                },
            )
            .await
            .unwrap();
        flush(&handle).await;

        // The submitter participates in the broadcast like everyone else.
        for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
            let votes: Vec<_> = drain(rx)
                .into_iter()
                .filter(|m| {
                    matches!(
                        m,
                        ServerMessage::SyncEvent {
                            event: DomainEvent::VoteCast { .. },
                            ..
                        }
                    )
                })
                .collect();
            assert_eq!(votes.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_reveal_broadcast_carries_computed_round() {
        let handle = spawn_router().await;
        let session = handle
            .create_session("Sprint".to_string(), ParticipantId::new(), "Alice".to_string())
            .await
            .unwrap();

        let (alice_conn, alice_id, mut alice_rx) =
            join_new_connection(&handle, session.id, "Alice").await;
        let (bob_conn, bob_id, _bob_rx) = join_new_connection(&handle, session.id, "Bob").await;

        handle
            .event(
                alice_conn,
                DomainEvent::RoundStarted {
                    issue_label: Some("Login bug".to_string()),
                    round: None,
                },
            )
            .await
            .unwrap();
        handle
            .event(
                alice_conn,
                DomainEvent::VoteCast {
                    participant_id: alice_id,
                    vote: Vote::from("3"),
                },
            )
            .await
            .unwrap();
        handle
            .event(
                bob_conn,
                DomainEvent::VoteCast {
                    participant_id: bob_id,
                    vote: Vote::from("5"),
                },
            )
            .await
            .unwrap();
        handle
            .event(alice_conn, DomainEvent::VotesRevealed { round: None })
            .await
            .unwrap();
        flush(&handle).await;

        let revealed = drain(&mut alice_rx).into_iter().find_map(|m| match m {
            ServerMessage::SyncEvent {
                event: DomainEvent::VotesRevealed { round: Some(round) },
                ..
            } => Some(round),
            _ => None,
        });

        let round = revealed.expect("reveal broadcast should carry the round");
        assert!(round.revealed);
        assert_eq!(round.average, Some(4.0));
        assert_eq!(round.has_agreement, Some(false));
    }

    #[tokio::test]
    async fn test_vote_without_round_is_silent_noop() {
        let handle = spawn_router().await;
        let session = handle
            .create_session("Sprint".to_string(), ParticipantId::new(), "Alice".to_string())
            .await
            .unwrap();

        let (alice_conn, alice_id, mut alice_rx) =
            join_new_connection(&handle, session.id, "Alice").await;
        drain(&mut alice_rx);

        handle
            .event(
                alice_conn,
                DomainEvent::VoteCast {
                    participant_id: alice_id,
                    vote: Vote::from("5"),
                },
            )
            .await
            .unwrap();
        flush(&handle).await;

        // No broadcast, no error notice: the failure is logged server-side.
        assert!(drain(&mut alice_rx).is_empty());
        let snapshot = handle.get_session(session.id).await.unwrap().unwrap();
        assert!(snapshot.current_round.is_none());
    }

    #[tokio::test]
    async fn test_leave_marks_offline_and_notifies_rest() {
        let handle = spawn_router().await;
        let session = handle
            .create_session("Sprint".to_string(), ParticipantId::new(), "Alice".to_string())
            .await
            .unwrap();

        let (_, _, mut alice_rx) = join_new_connection(&handle, session.id, "Alice").await;
        let (bob_conn, bob_id, _bob_rx) = join_new_connection(&handle, session.id, "Bob").await;
        flush(&handle).await;
        drain(&mut alice_rx);

        handle.leave(bob_conn).await.unwrap();
        flush(&handle).await;

        let notices: Vec<_> = drain(&mut alice_rx)
            .into_iter()
            .filter(|m| {
                matches!(
                    m,
                    ServerMessage::SyncEvent {
                        event: DomainEvent::ParticipantLeft { .. },
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(notices.len(), 1);

        // Bob's record survives, marked offline, for a later reconnect.
        let snapshot = handle.get_session(session.id).await.unwrap().unwrap();
        let bob = snapshot.participant(bob_id).unwrap();
        assert!(!bob.online);
    }

    #[tokio::test]
    async fn test_heartbeat_is_acked() {
        let handle = spawn_router().await;
        let session = handle
            .create_session("Sprint".to_string(), ParticipantId::new(), "Alice".to_string())
            .await
            .unwrap();
        let (alice_conn, _, mut alice_rx) =
            join_new_connection(&handle, session.id, "Alice").await;
        drain(&mut alice_rx);

        handle.heartbeat(alice_conn).await.unwrap();
        flush(&handle).await;

        assert!(drain(&mut alice_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::HeartbeatAck { .. })));
    }

    #[tokio::test]
    async fn test_cosmetic_event_is_relayed_without_mutation() {
        let handle = spawn_router().await;
        let session = handle
            .create_session("Sprint".to_string(), ParticipantId::new(), "Alice".to_string())
            .await
            .unwrap();
        let (alice_conn, _, mut alice_rx) =
            join_new_connection(&handle, session.id, "Alice").await;
        let before = handle.get_session(session.id).await.unwrap().unwrap();
        drain(&mut alice_rx);

        handle
            .event(
                alice_conn,
                DomainEvent::Cosmetic {
                    payload: serde_json::json!({"emoji": "👏"}),
                },
            )
            .await
            .unwrap();
        flush(&handle).await;

        assert!(drain(&mut alice_rx).iter().any(|m| matches!(
            m,
            ServerMessage::SyncEvent {
                event: DomainEvent::Cosmetic { .. },
                ..
            }
        )));
        let after = handle.get_session(session.id).await.unwrap().unwrap();
        // Relay only: the session state (activity timestamp aside) is
        // untouched.
        assert_eq!(before.participants, after.participants);
        assert_eq!(before.current_round, after.current_round);
        assert_eq!(before.history, after.history);
    }

    #[tokio::test]
    async fn test_remove_on_leave_policy_drops_roster_entry() {
        let config = RouterConfig {
            remove_participant_on_leave: true,
            ..RouterConfig::default()
        };
        let (handle, _task) = EventRouter::spawn(config, CancellationToken::new());
        let session = handle
            .create_session("Sprint".to_string(), ParticipantId::new(), "Alice".to_string())
            .await
            .unwrap();

        let (bob_conn, bob_id, _bob_rx) = join_new_connection(&handle, session.id, "Bob").await;
        handle.leave(bob_conn).await.unwrap();
        flush(&handle).await;

        let snapshot = handle.get_session(session.id).await.unwrap().unwrap();
        assert!(snapshot.participant(bob_id).is_none());
    }
}
