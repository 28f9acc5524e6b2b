//! Wire messages exchanged between clients and the coordinator.
//!
//! Everything on the wire is JSON with an internal `type`/`kind` tag, so an
//! unknown message kind fails deserialization at the socket boundary and is
//! answered with an `error` notice rather than reaching the router.

use crate::ids::{ParticipantId, SessionId};
use crate::round::{Round, Vote};
use crate::session::{Participant, Session, SettingsPatch, VotingSystem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A state-changing (or relayed) event within a session.
///
/// Each kind maps to exactly one registry mutation on the coordinator, except
/// [`DomainEvent::Cosmetic`], which is relayed verbatim without touching any
/// registry. Broadcast copies carry server-computed fields: a started round's
/// fresh record, a revealed round's statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A participant selected a card.
    VoteCast {
        participant_id: ParticipantId,
        vote: Vote,
    },
    /// A new voting round replaces the current one.
    ///
    /// Inbound copies carry only the optional issue label; the coordinator
    /// fills `round` with the record it created before broadcasting.
    RoundStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issue_label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round: Option<Round>,
    },
    /// The current round is revealed.
    ///
    /// The coordinator fills `round` with the finalized record (average,
    /// agreement) before broadcasting.
    VotesRevealed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round: Option<Round>,
    },
    /// Sparse update of session settings and metadata.
    SettingsChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<SettingsPatch>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        facilitator: Option<ParticipantId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voting_system: Option<VotingSystem>,
    },
    /// Roster notice: a participant joined or rejoined.
    ///
    /// Coordinator-originated; the joining connection itself receives the
    /// full snapshot in its `joined` acknowledgment instead.
    ParticipantJoined { participant: Participant },
    /// Roster notice: a participant left or went offline.
    ParticipantLeft { participant_id: ParticipantId },
    /// Transient interaction signal, relayed without registry mutation.
    Cosmetic { payload: serde_json::Value },
}

/// Messages from a participant's client to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: String,
        ts: DateTime<Utc>,
    },
    Leave {
        ts: DateTime<Utc>,
    },
    SyncEvent {
        event: DomainEvent,
        ts: DateTime<Utc>,
    },
    Heartbeat {
        ts: DateTime<Utc>,
    },
}

/// Messages from the coordinator to a participant's client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join acknowledgment carrying the full session snapshot. Sent only to
    /// the joining connection.
    Joined {
        session: Session,
        ts: DateTime<Utc>,
    },
    /// The join target does not exist. Distinct from a generic `error` so
    /// clients can drop the stale session reference instead of retrying.
    SessionNotFound {
        message: String,
        ts: DateTime<Utc>,
    },
    /// Malformed or invalid input; sent only to the offending connection.
    Error {
        message: String,
        ts: DateTime<Utc>,
    },
    /// Broadcast copy of a domain event, including server-computed fields.
    SyncEvent {
        event: DomainEvent,
        ts: DateTime<Utc>,
    },
    HeartbeatAck {
        ts: DateTime<Utc>,
    },
}
