//! Connection registry - transport-level routing state.
//!
//! Maps live connection handles to their (session, participant) identity.
//! Records are ephemeral: created on a successful join, destroyed on
//! transport close or heartbeat timeout, never persisted.
//!
//! Outbound delivery is fire-and-forget through an unbounded sender: the
//! router never awaits a slow socket, and dropping a record drops its
//! sender, which closes the connection's socket pump. During a reconnect
//! race two connections may briefly map to the same (session, participant);
//! the secondary index tracks the newest while the older record stays
//! registered until it closes or times out.

use poker_protocol::{ParticipantId, ServerMessage, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Unique identifier for one transport-level connection.
///
/// A reconnect always allocates a new id; connection ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Routing record for one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub display_name: String,
    /// Fire-and-forget outbound queue, pumped to the socket by the
    /// connection's own task.
    pub outbound: mpsc::UnboundedSender<ServerMessage>,
    pub last_heartbeat: Instant,
}

impl ConnectionRecord {
    /// Best-effort send; a closed pump is ignored so one dead socket never
    /// aborts a broadcast.
    pub fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }
}

/// Owns all [`ConnectionRecord`]s plus secondary indexes for
/// session-scoped broadcast and duplicate-connection detection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_id: HashMap<ConnectionId, ConnectionRecord>,
    by_session: HashMap<SessionId, HashSet<ConnectionId>>,
    by_participant: HashMap<(SessionId, ParticipantId), ConnectionId>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new connection mapping with a fresh heartbeat timestamp.
    pub fn register(
        &mut self,
        id: ConnectionId,
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let record = ConnectionRecord {
            id,
            session_id,
            participant_id,
            display_name: display_name.into(),
            outbound,
            last_heartbeat: Instant::now(),
        };
        self.by_session.entry(session_id).or_default().insert(id);
        self.by_participant.insert((session_id, participant_id), id);
        self.by_id.insert(id, record);
    }

    /// Remove a connection and both of its index entries.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        let record = self.by_id.remove(&id)?;
        if let Some(set) = self.by_session.get_mut(&record.session_id) {
            set.remove(&id);
            if set.is_empty() {
                self.by_session.remove(&record.session_id);
            }
        }
        // Only clear the participant index if it still points at us; a
        // reconnect may have already claimed the slot.
        let key = (record.session_id, record.participant_id);
        if self.by_participant.get(&key) == Some(&id) {
            self.by_participant.remove(&key);
        }
        Some(record)
    }

    #[must_use]
    pub fn lookup(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.by_id.get(&id)
    }

    /// All live connections joined to a session.
    #[must_use]
    pub fn list_by_session(&self, session_id: SessionId) -> Vec<&ConnectionRecord> {
        self.by_session
            .get(&session_id)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).collect())
            .unwrap_or_default()
    }

    /// The connection currently mapped to a (session, participant) pair.
    ///
    /// During a reconnect race this is the newest registration; after a
    /// participant's last connection closes it is `None`.
    #[must_use]
    pub fn participant_connection(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Option<ConnectionId> {
        self.by_participant
            .get(&(session_id, participant_id))
            .copied()
    }

    /// Refresh a connection's heartbeat timestamp. Returns false for an
    /// unknown connection.
    pub fn touch_heartbeat(&mut self, id: ConnectionId) -> bool {
        match self.by_id.get_mut(&id) {
            Some(record) => {
                record.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Evict every connection whose heartbeat is older than `max_age`.
    ///
    /// Returns the removed records so the router can produce the same
    /// offline notices an explicit close would. Dropping each record's
    /// sender closes its socket pump (best-effort transport close).
    pub fn sweep_stale(&mut self, max_age: Duration) -> Vec<ConnectionRecord> {
        let now = Instant::now();
        let stale: Vec<ConnectionId> = self
            .by_id
            .values()
            .filter(|record| now.duration_since(record.last_heartbeat) > max_age)
            .map(|record| record.id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.unregister(id))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
