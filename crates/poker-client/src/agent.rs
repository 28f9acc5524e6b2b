//! `ReconciliationAgent` - per-participant client state machine.
//!
//! The agent owns one outbound connection at a time plus the local session
//! mirror, and moves through `Disconnected -> Connecting -> Connected`
//! with two exits: `Disconnected` (intentional leave, or a non-retryable
//! `session_not_found`) and `Failed` (reconnect attempts exhausted).
//!
//! On every established connection it immediately sends the join request
//! and starts a recurring heartbeat, deliberately shorter than the
//! coordinator's staleness threshold so jitter never causes a false
//! eviction. Broadcast events are merged into the mirror with the same
//! rules the coordinator applies, so re-receiving an own, already-applied
//! mutation is a no-op.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::errors::AgentError;
use crate::mirror::SessionMirror;
use crate::store::PendingVoteStore;
use crate::transport::{ClientTransport, Connection};

use chrono::Utc;
use poker_protocol::{
    ClientMessage, DomainEvent, ParticipantId, ServerMessage, Session, SessionId, SettingsPatch,
    Vote, VotingSystem,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the command mailbox.
const COMMAND_CHANNEL_BUFFER: usize = 64;

/// Default heartbeat cadence; shorter than the coordinator's 30s staleness
/// threshold.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Agent connection state, published through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts exhausted; no further automatic retry.
    Failed,
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub heartbeat_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Location of the durable pending-vote file.
    pub store_path: PathBuf,
}

impl AgentConfig {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        store_path: PathBuf,
    ) -> Self {
        Self {
            session_id,
            participant_id,
            display_name: display_name.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff: BackoffPolicy::default(),
            store_path,
        }
    }
}

/// Commands from the caller (presentation layer) to the agent.
enum AgentCommand {
    CastVote(Vote),
    StartRound { issue_label: Option<String> },
    RevealVotes,
    ChangeSettings {
        settings: Option<SettingsPatch>,
        facilitator: Option<ParticipantId>,
        name: Option<String>,
        voting_system: Option<VotingSystem>,
    },
    SendCosmetic(serde_json::Value),
}

/// Handle to a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    command_tx: mpsc::Sender<AgentCommand>,
    status_rx: watch::Receiver<AgentStatus>,
    mirror_rx: watch::Receiver<Option<Session>>,
    cancel_token: CancellationToken,
}

impl AgentHandle {
    /// Cast a vote in the current round.
    ///
    /// While offline the vote is held durably and replayed once on the
    /// next successful reconnect.
    pub async fn cast_vote(&self, vote: Vote) -> Result<(), AgentError> {
        self.send(AgentCommand::CastVote(vote)).await
    }

    /// Start a new voting round.
    pub async fn start_round(&self, issue_label: Option<String>) -> Result<(), AgentError> {
        self.send(AgentCommand::StartRound { issue_label }).await
    }

    /// Reveal the current round.
    pub async fn reveal_votes(&self) -> Result<(), AgentError> {
        self.send(AgentCommand::RevealVotes).await
    }

    /// Apply a sparse settings update.
    pub async fn change_settings(
        &self,
        settings: Option<SettingsPatch>,
        facilitator: Option<ParticipantId>,
        name: Option<String>,
        voting_system: Option<VotingSystem>,
    ) -> Result<(), AgentError> {
        self.send(AgentCommand::ChangeSettings {
            settings,
            facilitator,
            name,
            voting_system,
        })
        .await
    }

    /// Relay a transient interaction signal.
    pub async fn send_cosmetic(&self, payload: serde_json::Value) -> Result<(), AgentError> {
        self.send(AgentCommand::SendCosmetic(payload)).await
    }

    /// Leave intentionally: cancels any pending reconnect and stops the
    /// agent. The mirror keeps its last snapshot for the caller to read.
    pub fn leave(&self) {
        self.cancel_token.cancel();
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status transitions.
    #[must_use]
    pub fn status_stream(&self) -> watch::Receiver<AgentStatus> {
        self.status_rx.clone()
    }

    /// Current mirror snapshot.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.mirror_rx.borrow().clone()
    }

    /// Subscribe to mirror updates.
    #[must_use]
    pub fn session_stream(&self) -> watch::Receiver<Option<Session>> {
        self.mirror_rx.clone()
    }

    async fn send(&self, command: AgentCommand) -> Result<(), AgentError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|e| AgentError::Mailbox(format!("channel send failed: {e}")))
    }
}

/// Why a session loop ended.
enum SessionExit {
    /// Locally initiated: leave requested or every handle dropped.
    Intentional,
    /// The coordinator reported the session gone; non-retryable.
    SessionGone,
    /// The transport dropped abnormally; reconnect with backoff.
    ConnectionLost,
}

/// The `ReconciliationAgent` implementation.
pub struct ReconciliationAgent {
    config: AgentConfig,
    transport: Arc<dyn ClientTransport>,
    mirror: SessionMirror,
    store: PendingVoteStore,
    command_rx: mpsc::Receiver<AgentCommand>,
    status_tx: watch::Sender<AgentStatus>,
    cancel_token: CancellationToken,
    backoff: Backoff,
}

impl ReconciliationAgent {
    /// Spawn the agent task.
    pub fn spawn(
        config: AgentConfig,
        transport: Arc<dyn ClientTransport>,
    ) -> (AgentHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let (status_tx, status_rx) = watch::channel(AgentStatus::Disconnected);
        let cancel_token = CancellationToken::new();

        let mirror = SessionMirror::new();
        let mirror_rx = mirror.subscribe();
        let store = PendingVoteStore::new(config.store_path.clone());
        let backoff = Backoff::new(config.backoff);

        let actor = Self {
            config,
            transport,
            mirror,
            store,
            command_rx,
            status_tx,
            cancel_token: cancel_token.clone(),
            backoff,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = AgentHandle {
            command_tx,
            status_rx,
            mirror_rx,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the connect/reconnect loop.
    #[instrument(skip_all, name = "poker.client.agent", fields(participant_id = %self.config.participant_id))]
    async fn run(mut self) {
        info!(
            target: "poker.client.agent",
            session_id = %self.config.session_id,
            "Agent started"
        );

        loop {
            if self.cancel_token.is_cancelled() {
                self.set_status(AgentStatus::Disconnected);
                break;
            }

            self.set_status(AgentStatus::Connecting);
            let connection = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.set_status(AgentStatus::Disconnected);
                    break;
                }
                result = self.transport.connect() => match result {
                    Ok(connection) => connection,
                    Err(error) => {
                        warn!(target: "poker.client.agent", error = %error, "Connect failed");
                        if self.wait_backoff().await {
                            continue;
                        }
                        break;
                    }
                }
            };

            self.set_status(AgentStatus::Connected);
            self.backoff.reset();

            match self.run_session(connection).await {
                SessionExit::Intentional => {
                    self.set_status(AgentStatus::Disconnected);
                    break;
                }
                SessionExit::SessionGone => {
                    // Non-retryable: the session reference is stale. Tear
                    // down local state entirely instead of reconnecting.
                    info!(
                        target: "poker.client.agent",
                        session_id = %self.config.session_id,
                        "Session not found, tearing down"
                    );
                    self.mirror.clear();
                    self.set_status(AgentStatus::Disconnected);
                    break;
                }
                SessionExit::ConnectionLost => {
                    warn!(target: "poker.client.agent", "Connection lost");
                    self.set_status(AgentStatus::Disconnected);
                    if !self.wait_backoff().await {
                        break;
                    }
                }
            }
        }

        let final_status = *self.status_tx.borrow();
        info!(
            target: "poker.client.agent",
            status = ?final_status,
            "Agent stopped"
        );
    }

    /// Drive one established connection until it ends.
    async fn run_session(&mut self, mut connection: Connection) -> SessionExit {
        // Join first; everything else waits for the ack.
        let join = ClientMessage::Join {
            session_id: self.config.session_id,
            participant_id: self.config.participant_id,
            display_name: self.config.display_name.clone(),
            ts: Utc::now(),
        };
        if connection.sender.send(join).is_err() {
            return SessionExit::ConnectionLost;
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Consume the immediate first tick; the join itself proves
        // liveness.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    let _ = connection.sender.send(ClientMessage::Leave { ts: Utc::now() });
                    return SessionExit::Intentional;
                }

                _ = heartbeat.tick() => {
                    if connection
                        .sender
                        .send(ClientMessage::Heartbeat { ts: Utc::now() })
                        .is_err()
                    {
                        return SessionExit::ConnectionLost;
                    }
                }

                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command_online(&connection, command),
                    None => {
                        // Every handle dropped; treat like a leave.
                        let _ = connection.sender.send(ClientMessage::Leave { ts: Utc::now() });
                        return SessionExit::Intentional;
                    }
                },

                message = connection.receiver.recv() => match message {
                    Some(message) => {
                        if let Some(exit) = self.handle_server_message(&connection, message) {
                            return exit;
                        }
                    }
                    None => return SessionExit::ConnectionLost,
                }
            }
        }
    }

    /// Apply one server message. Returns `Some` to end the session loop.
    fn handle_server_message(
        &mut self,
        connection: &Connection,
        message: ServerMessage,
    ) -> Option<SessionExit> {
        match message {
            ServerMessage::Joined { session, .. } => {
                debug!(target: "poker.client.agent", "Joined, resetting mirror");
                self.mirror.reset(session);
                self.replay_pending_vote(connection);
                None
            }
            ServerMessage::SessionNotFound { .. } => Some(SessionExit::SessionGone),
            ServerMessage::SyncEvent { event, .. } => {
                self.mirror.apply(&event);
                None
            }
            ServerMessage::Error { message, .. } => {
                warn!(target: "poker.client.agent", message = %message, "Server error notice");
                None
            }
            ServerMessage::HeartbeatAck { .. } => None,
        }
    }

    /// Handle a caller command while connected: apply optimistically where
    /// the merge is idempotent, then send.
    fn handle_command_online(&mut self, connection: &Connection, command: AgentCommand) {
        match command {
            AgentCommand::CastVote(vote) => {
                let event = DomainEvent::VoteCast {
                    participant_id: self.config.participant_id,
                    vote: vote.clone(),
                };
                // Optimistic: the echoed broadcast re-applies harmlessly.
                self.mirror.apply(&event);
                if self.send_event(connection, event).is_err() {
                    self.hold_vote(&vote);
                }
            }
            AgentCommand::StartRound { issue_label } => {
                let event = DomainEvent::RoundStarted {
                    issue_label,
                    round: None,
                };
                // Provisional local round; the broadcast carries the
                // authoritative one and replaces it.
                self.mirror.apply(&event);
                let _ = self.send_event(connection, event);
            }
            AgentCommand::RevealVotes => {
                // No optimistic reveal: the statistics are server-computed.
                let _ = self.send_event(connection, DomainEvent::VotesRevealed { round: None });
            }
            AgentCommand::ChangeSettings {
                settings,
                facilitator,
                name,
                voting_system,
            } => {
                let _ = self.send_event(
                    connection,
                    DomainEvent::SettingsChanged {
                        settings,
                        facilitator,
                        name,
                        voting_system,
                    },
                );
            }
            AgentCommand::SendCosmetic(payload) => {
                let _ = self.send_event(connection, DomainEvent::Cosmetic { payload });
            }
        }
    }

    /// Handle a caller command while offline (backing off between
    /// reconnects). Only votes are durable; everything else needs a live
    /// session to mean anything.
    fn handle_command_offline(&mut self, command: AgentCommand) {
        match command {
            AgentCommand::CastVote(vote) => {
                let event = DomainEvent::VoteCast {
                    participant_id: self.config.participant_id,
                    vote: vote.clone(),
                };
                self.mirror.apply(&event);
                self.hold_vote(&vote);
            }
            AgentCommand::StartRound { .. }
            | AgentCommand::RevealVotes
            | AgentCommand::ChangeSettings { .. }
            | AgentCommand::SendCosmetic(_) => {
                debug!(
                    target: "poker.client.agent",
                    "Dropping non-vote command while offline"
                );
            }
        }
    }

    fn send_event(
        &self,
        connection: &Connection,
        event: DomainEvent,
    ) -> Result<(), AgentError> {
        connection
            .sender
            .send(ClientMessage::SyncEvent {
                event,
                ts: Utc::now(),
            })
            .map_err(|e| AgentError::Transport(format!("send failed: {e}")))
    }

    /// Persist a vote for replay on the next reconnect.
    fn hold_vote(&self, vote: &Vote) {
        if let Err(error) =
            self.store
                .record(self.config.session_id, self.config.participant_id, vote)
        {
            warn!(target: "poker.client.agent", error = %error, "Failed to hold offline vote");
        }
    }

    /// Replay a held vote exactly once after a successful (re)join.
    fn replay_pending_vote(&mut self, connection: &Connection) {
        match self
            .store
            .take(self.config.session_id, self.config.participant_id)
        {
            Ok(Some(vote)) => {
                info!(target: "poker.client.agent", "Replaying held vote");
                let event = DomainEvent::VoteCast {
                    participant_id: self.config.participant_id,
                    vote,
                };
                self.mirror.apply(&event);
                let _ = self.send_event(connection, event);
            }
            Ok(None) => {}
            Err(error) => {
                warn!(target: "poker.client.agent", error = %error, "Pending vote unavailable");
            }
        }
    }

    /// Sleep out the next backoff window, still servicing commands.
    ///
    /// Returns false when the agent should stop: attempts exhausted
    /// (status moves to `Failed`) or an intentional leave cancelled the
    /// pending retry.
    async fn wait_backoff(&mut self) -> bool {
        let Some(delay) = self.backoff.next_delay() else {
            warn!(
                target: "poker.client.agent",
                attempts = self.backoff.attempts(),
                "Reconnect attempts exhausted"
            );
            self.set_status(AgentStatus::Failed);
            return false;
        };

        info!(
            target: "poker.client.agent",
            delay_secs = delay.as_secs(),
            attempt = self.backoff.attempts(),
            "Scheduling reconnect"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.set_status(AgentStatus::Disconnected);
                    return false;
                }
                () = &mut sleep => return true,
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command_offline(command),
                    None => {
                        self.set_status(AgentStatus::Disconnected);
                        return false;
                    }
                }
            }
        }
    }

    fn set_status(&self, status: AgentStatus) {
        let _ = self.status_tx.send(status);
    }
}
