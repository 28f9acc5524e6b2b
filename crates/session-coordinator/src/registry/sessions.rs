//! Session registry - canonical state of every active session.
//!
//! Pure data and mutation operations; no I/O. Each operation is atomic with
//! respect to a single session, and every successful mutation refreshes that
//! session's last-activity timestamp so the liveness sweep sees it.

use crate::errors::CoordinatorError;
use chrono::Utc;
use poker_protocol::{
    Participant, ParticipantId, Round, Session, SessionId, SessionSummary, SettingsPatch, Vote,
    VotingSystem,
};
use std::collections::HashMap;
use std::time::Duration;

/// Owns all [`Session`] records.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with default settings, the facilitator seeded as the
    /// first online roster entry, and last-activity set to now.
    pub fn create_session(
        &mut self,
        name: impl Into<String>,
        facilitator_id: ParticipantId,
        facilitator_name: impl Into<String>,
    ) -> Session {
        let session = Session::new(name, facilitator_id, facilitator_name, Utc::now());
        self.sessions.insert(session.id, session.clone());
        session
    }

    #[must_use]
    pub fn get(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// Add a participant to the roster, or restore an existing entry.
    ///
    /// A rejoin with an already-known id overwrites the record (picking up a
    /// possibly-new display name) but always forces it online; the roster
    /// never grows a duplicate entry.
    pub fn add_or_restore_participant(
        &mut self,
        session_id: SessionId,
        participant: Participant,
    ) -> Result<Participant, CoordinatorError> {
        let session = self.session_mut(session_id)?;
        let restored = match session.participant_mut(participant.id) {
            Some(existing) => {
                existing.name = participant.name;
                existing.online = true;
                existing.clone()
            }
            None => {
                let mut fresh = participant;
                fresh.online = true;
                session.participants.push(fresh.clone());
                fresh
            }
        };
        session.last_activity = Utc::now();
        Ok(restored)
    }

    /// Mark a participant offline, preserving their roster entry and any
    /// in-round vote so a reconnect restores prior state.
    pub fn mark_participant_offline(
        &mut self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<(), CoordinatorError> {
        let session = self.session_mut(session_id)?;
        if let Some(participant) = session.participant_mut(participant_id) {
            participant.online = false;
        }
        session.last_activity = Utc::now();
        Ok(())
    }

    /// Alternate leave policy: delete the roster entry outright and prune
    /// the participant's vote from the current round.
    pub fn remove_participant(
        &mut self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<(), CoordinatorError> {
        let session = self.session_mut(session_id)?;
        session.participants.retain(|p| p.id != participant_id);
        if let Some(round) = session.current_round.as_mut() {
            round.votes.remove(&participant_id);
        }
        session.last_activity = Utc::now();
        Ok(())
    }

    /// Record a vote in the current round and on the participant record.
    pub fn record_vote(
        &mut self,
        session_id: SessionId,
        participant_id: ParticipantId,
        vote: Vote,
    ) -> Result<(), CoordinatorError> {
        let session = self.session_mut(session_id)?;
        let round = session
            .current_round
            .as_mut()
            .ok_or(CoordinatorError::NoActiveRound)?;
        if round.revealed {
            return Err(CoordinatorError::RoundAlreadyRevealed);
        }
        if session.participant(participant_id).is_none() {
            return Err(CoordinatorError::ParticipantNotFound);
        }

        if let Some(round) = session.current_round.as_mut() {
            round.votes.insert(participant_id, vote.clone());
        }
        if let Some(participant) = session.participant_mut(participant_id) {
            participant.vote = Some(vote);
            participant.has_voted = true;
        }
        session.last_activity = Utc::now();
        Ok(())
    }

    /// Replace the current round with a fresh one and clear every
    /// participant's vote state.
    pub fn start_round(
        &mut self,
        session_id: SessionId,
        issue_label: Option<String>,
    ) -> Result<Round, CoordinatorError> {
        let session = self.session_mut(session_id)?;
        let round = Round::new(issue_label, Utc::now());
        for participant in &mut session.participants {
            participant.vote = None;
            participant.has_voted = false;
        }
        session.current_round = Some(round.clone());
        session.last_activity = Utc::now();
        Ok(round)
    }

    /// Finalize the current round and append an immutable snapshot to the
    /// session history. Returns the finalized round for broadcasting.
    pub fn reveal_round(&mut self, session_id: SessionId) -> Result<Round, CoordinatorError> {
        let session = self.session_mut(session_id)?;
        let round = session
            .current_round
            .as_mut()
            .ok_or(CoordinatorError::NoActiveRound)?;
        if round.revealed {
            return Err(CoordinatorError::RoundAlreadyRevealed);
        }

        round.reveal(Utc::now());
        let snapshot = round.clone();
        session.history.push(snapshot.clone());
        session.last_activity = Utc::now();
        Ok(snapshot)
    }

    /// Sparse update of settings and session metadata; omitted fields are
    /// left unchanged.
    pub fn apply_settings(
        &mut self,
        session_id: SessionId,
        patch: Option<&SettingsPatch>,
        facilitator: Option<ParticipantId>,
        name: Option<String>,
        voting_system: Option<VotingSystem>,
    ) -> Result<(), CoordinatorError> {
        let session = self.session_mut(session_id)?;
        if let Some(patch) = patch {
            patch.apply_to(&mut session.settings);
        }
        if let Some(facilitator) = facilitator {
            session.facilitator = facilitator;
        }
        if let Some(name) = name {
            session.name = name;
        }
        if let Some(voting_system) = voting_system {
            session.voting_system = voting_system;
        }
        session.last_activity = Utc::now();
        Ok(())
    }

    /// Delete every session whose last activity is older than `max_age`,
    /// regardless of participant presence. Returns the number deleted.
    pub fn sweep_inactive(&mut self, max_age: Duration) -> usize {
        let now = Utc::now();
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::MAX);
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.signed_duration_since(session.last_activity) <= max_age);
        before - self.sessions.len()
    }

    /// Condensed views of every active session.
    #[must_use]
    pub fn list_summaries(&self) -> Vec<SessionSummary> {
        self.sessions.values().map(Session::summary).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut Session, CoordinatorError> {
        self.sessions
            .get_mut(&session_id)
            .ok_or(CoordinatorError::SessionNotFound)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn registry_with_session() -> (SessionRegistry, SessionId, ParticipantId) {
        let mut registry = SessionRegistry::new();
        let alice = ParticipantId::new();
        let session = registry.create_session("Sprint 4", alice, "Alice");
        (registry, session.id, alice)
    }

    #[test]
    fn test_create_session_seeds_facilitator_online() {
        let (registry, session_id, alice) = registry_with_session();

        let session = registry.get(session_id).unwrap();
        assert_eq!(session.facilitator, alice);
        assert_eq!(session.participants.len(), 1);
        assert!(session.participant(alice).unwrap().online);
        assert!(!session.settings.auto_reveal);
        assert!(session.settings.show_average);
    }

    #[test]
    fn test_rejoin_replaces_entry_without_duplicating() {
        let (mut registry, session_id, alice) = registry_with_session();
        registry
            .mark_participant_offline(session_id, alice)
            .unwrap();

        registry
            .add_or_restore_participant(session_id, Participant::new(alice, "Alice (phone)"))
            .unwrap();

        let session = registry.get(session_id).unwrap();
        assert_eq!(session.participants.len(), 1);
        let entry = session.participant(alice).unwrap();
        assert_eq!(entry.name, "Alice (phone)");
        assert!(entry.online);
    }

    #[test]
    fn test_rejoin_preserves_prior_vote() {
        let (mut registry, session_id, alice) = registry_with_session();
        registry.start_round(session_id, None).unwrap();
        registry
            .record_vote(session_id, alice, Vote::from("8"))
            .unwrap();

        registry
            .mark_participant_offline(session_id, alice)
            .unwrap();
        registry
            .add_or_restore_participant(session_id, Participant::new(alice, "Alice"))
            .unwrap();

        let session = registry.get(session_id).unwrap();
        let round = session.current_round.as_ref().unwrap();
        assert_eq!(round.votes.get(&alice), Some(&Vote::from("8")));
    }

    #[test]
    fn test_remove_participant_prunes_round_vote() {
        let (mut registry, session_id, _alice) = registry_with_session();
        let bob = ParticipantId::new();
        registry
            .add_or_restore_participant(session_id, Participant::new(bob, "Bob"))
            .unwrap();
        registry.start_round(session_id, None).unwrap();
        registry
            .record_vote(session_id, bob, Vote::from("5"))
            .unwrap();

        registry.remove_participant(session_id, bob).unwrap();

        let session = registry.get(session_id).unwrap();
        assert!(session.participant(bob).is_none());
        assert!(session
            .current_round
            .as_ref()
            .unwrap()
            .votes
            .is_empty());
    }

    #[test]
    fn test_round_isolation() {
        let (mut registry, session_id, alice) = registry_with_session();
        registry.start_round(session_id, None).unwrap();
        registry
            .record_vote(session_id, alice, Vote::from("13"))
            .unwrap();

        registry
            .start_round(session_id, Some("Next issue".to_string()))
            .unwrap();

        let session = registry.get(session_id).unwrap();
        let round = session.current_round.as_ref().unwrap();
        assert!(round.votes.is_empty());
        let entry = session.participant(alice).unwrap();
        assert!(!entry.has_voted);
        assert!(entry.vote.is_none());
    }

    #[test]
    fn test_record_vote_without_round_is_rejected() {
        let (mut registry, session_id, alice) = registry_with_session();

        let result = registry.record_vote(session_id, alice, Vote::from("3"));

        assert!(matches!(result, Err(CoordinatorError::NoActiveRound)));
        assert!(registry.get(session_id).unwrap().current_round.is_none());
    }

    #[test]
    fn test_record_vote_after_reveal_is_rejected() {
        let (mut registry, session_id, alice) = registry_with_session();
        registry.start_round(session_id, None).unwrap();
        registry
            .record_vote(session_id, alice, Vote::from("3"))
            .unwrap();
        registry.reveal_round(session_id).unwrap();

        let result = registry.record_vote(session_id, alice, Vote::from("5"));

        assert!(matches!(
            result,
            Err(CoordinatorError::RoundAlreadyRevealed)
        ));
    }

    #[test]
    fn test_reveal_twice_is_rejected() {
        let (mut registry, session_id, alice) = registry_with_session();
        registry.start_round(session_id, None).unwrap();
        registry
            .record_vote(session_id, alice, Vote::from("3"))
            .unwrap();
        registry.reveal_round(session_id).unwrap();

        let result = registry.reveal_round(session_id);

        assert!(matches!(
            result,
            Err(CoordinatorError::RoundAlreadyRevealed)
        ));
        assert_eq!(registry.get(session_id).unwrap().history.len(), 1);
    }

    #[test]
    fn test_reveal_appends_immutable_snapshot() {
        let (mut registry, session_id, alice) = registry_with_session();
        let bob = ParticipantId::new();
        registry
            .add_or_restore_participant(session_id, Participant::new(bob, "Bob"))
            .unwrap();
        registry.start_round(session_id, None).unwrap();
        registry
            .record_vote(session_id, alice, Vote::from("3"))
            .unwrap();
        registry
            .record_vote(session_id, bob, Vote::from("5"))
            .unwrap();

        let revealed = registry.reveal_round(session_id).unwrap();

        assert!(revealed.revealed);
        assert_eq!(revealed.average, Some(4.0));
        assert_eq!(revealed.has_agreement, Some(false));

        let session = registry.get(session_id).unwrap();
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history.first().unwrap().id, revealed.id);
    }

    #[test]
    fn test_apply_settings_sparse_merge() {
        let (mut registry, session_id, _) = registry_with_session();

        registry
            .apply_settings(
                session_id,
                Some(&SettingsPatch {
                    auto_reveal: Some(true),
                    ..SettingsPatch::default()
                }),
                None,
                Some("Sprint 5".to_string()),
                Some(VotingSystem::TShirts),
            )
            .unwrap();

        let session = registry.get(session_id).unwrap();
        assert!(session.settings.auto_reveal);
        // Untouched fields keep their defaults.
        assert!(session.settings.show_countdown);
        assert_eq!(session.name, "Sprint 5");
        assert_eq!(session.voting_system, VotingSystem::TShirts);
    }

    #[test]
    fn test_sweep_inactive_deletes_regardless_of_roster() {
        let (mut registry, session_id, _) = registry_with_session();

        // Backdate the session past the threshold; the facilitator is still
        // on the roster and marked online, which must not protect it.
        registry
            .sessions
            .get_mut(&session_id)
            .unwrap()
            .last_activity = Utc::now() - chrono::Duration::try_seconds(3600).unwrap();

        let swept = registry.sweep_inactive(Duration::from_secs(900));

        assert_eq!(swept, 1);
        assert!(registry.get(session_id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_inactive_keeps_fresh_sessions() {
        let (mut registry, session_id, _) = registry_with_session();

        let swept = registry.sweep_inactive(Duration::from_secs(900));

        assert_eq!(swept, 0);
        assert!(registry.get(session_id).is_some());
    }

    #[test]
    fn test_operations_on_missing_session() {
        let mut registry = SessionRegistry::new();
        let ghost = SessionId::new();
        let someone = ParticipantId::new();

        assert!(matches!(
            registry.record_vote(ghost, someone, Vote::from("1")),
            Err(CoordinatorError::SessionNotFound)
        ));
        assert!(matches!(
            registry.start_round(ghost, None),
            Err(CoordinatorError::SessionNotFound)
        ));
        assert!(matches!(
            registry.mark_participant_offline(ghost, someone),
            Err(CoordinatorError::SessionNotFound)
        ));
    }

    #[test]
    fn test_list_summaries_counts_online_only() {
        let (mut registry, session_id, _) = registry_with_session();
        let bob = ParticipantId::new();
        registry
            .add_or_restore_participant(session_id, Participant::new(bob, "Bob"))
            .unwrap();
        registry.mark_participant_offline(session_id, bob).unwrap();

        let summaries = registry.list_summaries();

        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries.first().unwrap().online_participant_count,
            1
        );
    }
}
