//! Durable pending-vote store.
//!
//! A vote cast while offline is held here, keyed by (session, participant),
//! and replayed exactly once on the next successful reconnect. The store is
//! a small JSON file so the vote survives a client restart.

use crate::errors::AgentError;
use poker_protocol::{ParticipantId, SessionId, Vote};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    votes: HashMap<String, String>,
}

/// File-backed store for votes awaiting replay.
#[derive(Debug)]
pub struct PendingVoteStore {
    path: PathBuf,
}

impl PendingVoteStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Persist a vote for later replay, overwriting any earlier pending
    /// vote for the same (session, participant).
    pub fn record(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        vote: &Vote,
    ) -> Result<(), AgentError> {
        let mut file = self.load()?;
        file.votes
            .insert(key(session_id, participant_id), vote.0.clone());
        self.persist(&file)?;
        debug!(
            target: "poker.client.store",
            session_id = %session_id,
            "Pending vote recorded"
        );
        Ok(())
    }

    /// Remove and return the pending vote for (session, participant), if
    /// any. The removal is persisted immediately so the vote can never be
    /// replayed twice.
    pub fn take(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<Option<Vote>, AgentError> {
        let mut file = self.load()?;
        let vote = file.votes.remove(&key(session_id, participant_id));
        if vote.is_some() {
            self.persist(&file)?;
        }
        Ok(vote.map(Vote))
    }

    fn load(&self) -> Result<StoreFile, AgentError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| AgentError::Store(format!("corrupt store file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreFile::default()),
            Err(e) => Err(AgentError::Store(format!("read failed: {e}"))),
        }
    }

    fn persist(&self, file: &StoreFile) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::Store(format!("create dir failed: {e}")))?;
        }
        let raw = serde_json::to_string_pretty(file)
            .map_err(|e| AgentError::Store(format!("encode failed: {e}")))?;
        std::fs::write(&self.path, raw).map_err(|e| AgentError::Store(format!("write failed: {e}")))
    }
}

fn key(session_id: SessionId, participant_id: ParticipantId) -> String {
    format!("{session_id}:{participant_id}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> PendingVoteStore {
        let path = std::env::temp_dir()
            .join("poker-client-tests")
            .join(format!("{}.json", Uuid::new_v4()));
        PendingVoteStore::new(path)
    }

    #[test]
    fn test_take_without_record_is_none() {
        let store = temp_store();
        assert!(store
            .take(SessionId::new(), ParticipantId::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_record_then_take_exactly_once() {
        let store = temp_store();
        let session_id = SessionId::new();
        let participant_id = ParticipantId::new();

        store
            .record(session_id, participant_id, &Vote::from("8"))
            .unwrap();

        assert_eq!(
            store.take(session_id, participant_id).unwrap(),
            Some(Vote::from("8"))
        );
        // Gone after the first take.
        assert!(store.take(session_id, participant_id).unwrap().is_none());
    }

    #[test]
    fn test_record_overwrites_earlier_pending_vote() {
        let store = temp_store();
        let session_id = SessionId::new();
        let participant_id = ParticipantId::new();

        store
            .record(session_id, participant_id, &Vote::from("3"))
            .unwrap();
        store
            .record(session_id, participant_id, &Vote::from("13"))
            .unwrap();

        assert_eq!(
            store.take(session_id, participant_id).unwrap(),
            Some(Vote::from("13"))
        );
    }

    #[test]
    fn test_votes_are_keyed_per_session_and_participant() {
        let store = temp_store();
        let session_id = SessionId::new();
        let alice = ParticipantId::new();
        let bob = ParticipantId::new();

        store.record(session_id, alice, &Vote::from("5")).unwrap();

        assert!(store.take(session_id, bob).unwrap().is_none());
        assert_eq!(store.take(session_id, alice).unwrap(), Some(Vote::from("5")));
    }
}
