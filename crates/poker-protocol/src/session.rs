//! The session data model: roster, settings, round history.

use crate::ids::{ParticipantId, SessionId};
use crate::messages::DomainEvent;
use crate::round::{Round, Vote};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who may perform a privileged session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Everyone,
    Facilitator,
}

/// Card set used for estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingSystem {
    Fibonacci,
    ModifiedFibonacci,
    TShirts,
    PowersOfTwo,
}

impl VotingSystem {
    /// The card faces this system offers.
    #[must_use]
    pub fn cards(self) -> &'static [&'static str] {
        match self {
            Self::Fibonacci => &[
                "0", "1", "2", "3", "5", "8", "13", "21", "34", "55", "89", "?", "☕",
            ],
            Self::ModifiedFibonacci => &[
                "0", "0.5", "1", "2", "3", "5", "8", "13", "20", "40", "100", "?", "☕",
            ],
            Self::TShirts => &["XS", "S", "M", "L", "XL", "?", "☕"],
            Self::PowersOfTwo => &["0", "1", "2", "4", "8", "16", "32", "64", "?", "☕"],
        }
    }
}

impl Default for VotingSystem {
    fn default() -> Self {
        Self::Fibonacci
    }
}

/// Per-session feature toggles and permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Reveal automatically once every online participant has voted.
    pub auto_reveal: bool,
    pub show_average: bool,
    pub show_countdown: bool,
    pub fun_features: bool,
    pub who_can_reveal: Permission,
    pub who_can_manage_issues: Permission,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_reveal: false,
            show_average: true,
            show_countdown: true,
            fun_features: true,
            who_can_reveal: Permission::Everyone,
            who_can_manage_issues: Permission::Everyone,
        }
    }
}

/// Sparse settings update: only provided fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_reveal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_average: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_countdown: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fun_features: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_reveal: Option<Permission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_manage_issues: Option<Permission>,
}

impl SettingsPatch {
    /// Merge the provided fields into `settings`, leaving the rest unchanged.
    pub fn apply_to(&self, settings: &mut SessionSettings) {
        if let Some(v) = self.auto_reveal {
            settings.auto_reveal = v;
        }
        if let Some(v) = self.show_average {
            settings.show_average = v;
        }
        if let Some(v) = self.show_countdown {
            settings.show_countdown = v;
        }
        if let Some(v) = self.fun_features {
            settings.fun_features = v;
        }
        if let Some(v) = self.who_can_reveal {
            settings.who_can_reveal = v;
        }
        if let Some(v) = self.who_can_manage_issues {
            settings.who_can_manage_issues = v;
        }
    }
}

/// One identified member of a session.
///
/// The record survives disconnects: the coordinator only flips `online`,
/// so a returning participant finds their prior vote intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub vote: Option<Vote>,
    pub has_voted: bool,
    pub online: bool,
}

impl Participant {
    /// Create a fresh online participant with no vote.
    #[must_use]
    pub fn new(id: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            vote: None,
            has_voted: false,
            online: true,
        }
    }
}

/// One bounded estimation engagement.
///
/// The facilitator id always references a participant that has been part of
/// the roster at some point, though they need not still be connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub facilitator: ParticipantId,
    pub voting_system: VotingSystem,
    pub participants: Vec<Participant>,
    pub current_round: Option<Round>,
    /// Revealed rounds, oldest first. Entries are immutable snapshots.
    pub history: Vec<Round>,
    pub settings: SessionSettings,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Create a session with the facilitator seeded as the first (online)
    /// roster entry and default settings.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        facilitator_id: ParticipantId,
        facilitator_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            name: name.into(),
            facilitator: facilitator_id,
            voting_system: VotingSystem::default(),
            participants: vec![Participant::new(facilitator_id, facilitator_name)],
            current_round: None,
            history: Vec::new(),
            settings: SessionSettings::default(),
            last_activity: now,
        }
    }

    #[must_use]
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    /// Number of roster entries currently marked online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.participants.iter().filter(|p| p.online).count()
    }

    /// Condensed view for session listings.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.name.clone(),
            online_participant_count: self.online_count(),
            last_activity: self.last_activity,
        }
    }

    /// Apply a broadcast event to this local copy of the session.
    ///
    /// This is the client-side half of state reconciliation: it uses the
    /// same merge rules as the coordinator's registry, so a client that
    /// applies the event stream converges with the authoritative state.
    /// Application is idempotent - every sender receives its own broadcasts
    /// back, and re-applying an already-applied event must not change
    /// observable state (a re-inserted vote overwrites itself, a re-revealed
    /// round is matched by id against the history tail).
    pub fn apply_event(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::VoteCast {
                participant_id,
                vote,
            } => {
                if let Some(round) = self.current_round.as_mut() {
                    if !round.revealed {
                        round.votes.insert(*participant_id, vote.clone());
                        if let Some(p) = self.participant_mut(*participant_id) {
                            p.vote = Some(vote.clone());
                            p.has_voted = true;
                        }
                    }
                }
            }

            DomainEvent::RoundStarted { issue_label, round } => {
                // A broadcast carries the authoritative round; a local
                // optimistic application creates a provisional one that the
                // echoed broadcast then replaces.
                let fresh = round
                    .clone()
                    .unwrap_or_else(|| Round::new(issue_label.clone(), Utc::now()));
                for p in &mut self.participants {
                    p.vote = None;
                    p.has_voted = false;
                }
                self.current_round = Some(fresh);
            }

            DomainEvent::VotesRevealed { round } => match round {
                Some(revealed) => {
                    let already_recorded =
                        self.history.last().is_some_and(|h| h.id == revealed.id);
                    if !already_recorded {
                        self.history.push(revealed.clone());
                    }
                    self.current_round = Some(revealed.clone());
                }
                None => {
                    if let Some(current) = self.current_round.as_mut() {
                        if !current.revealed {
                            current.reveal(Utc::now());
                            let snapshot = current.clone();
                            self.history.push(snapshot);
                        }
                    }
                }
            },

            DomainEvent::SettingsChanged {
                settings,
                facilitator,
                name,
                voting_system,
            } => {
                if let Some(patch) = settings {
                    patch.apply_to(&mut self.settings);
                }
                if let Some(facilitator) = facilitator {
                    self.facilitator = *facilitator;
                }
                if let Some(name) = name {
                    self.name.clone_from(name);
                }
                if let Some(voting_system) = voting_system {
                    self.voting_system = *voting_system;
                }
            }

            DomainEvent::ParticipantJoined { participant } => {
                let position = self.participants.iter().position(|p| p.id == participant.id);
                if let Some(existing) = position.and_then(|i| self.participants.get_mut(i)) {
                    *existing = participant.clone();
                    existing.online = true;
                } else {
                    self.participants.push(participant.clone());
                }
            }

            DomainEvent::ParticipantLeft { participant_id } => {
                if let Some(p) = self.participant_mut(*participant_id) {
                    p.online = false;
                }
            }

            // Pure relay; nothing to merge.
            DomainEvent::Cosmetic { .. } => {}
        }
    }
}

/// Condensed session view for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub online_participant_count: usize,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn session_with_two() -> (Session, ParticipantId, ParticipantId) {
        let alice = ParticipantId::new();
        let bob = ParticipantId::new();
        let mut session = Session::new("Sprint 4", alice, "Alice", Utc::now());
        session
            .participants
            .push(Participant::new(bob, "Bob"));
        (session, alice, bob)
    }

    #[test]
    fn test_settings_patch_merges_only_provided_fields() {
        let mut settings = SessionSettings::default();
        let patch = SettingsPatch {
            auto_reveal: Some(true),
            show_average: None,
            ..SettingsPatch::default()
        };

        patch.apply_to(&mut settings);

        assert!(settings.auto_reveal);
        assert!(settings.show_average);
        assert_eq!(settings.who_can_reveal, Permission::Everyone);
    }

    #[test]
    fn test_apply_vote_is_idempotent() {
        let (mut session, alice, _) = session_with_two();
        session.current_round = Some(Round::new(None, Utc::now()));

        let event = DomainEvent::VoteCast {
            participant_id: alice,
            vote: Vote::from("5"),
        };
        session.apply_event(&event);
        session.apply_event(&event);

        let round = session.current_round.as_ref().unwrap();
        assert_eq!(round.votes.len(), 1);
        assert_eq!(round.votes.get(&alice), Some(&Vote::from("5")));
        assert!(session.participant(alice).unwrap().has_voted);
    }

    #[test]
    fn test_apply_vote_without_round_is_noop() {
        let (mut session, alice, _) = session_with_two();

        session.apply_event(&DomainEvent::VoteCast {
            participant_id: alice,
            vote: Vote::from("5"),
        });

        assert!(session.current_round.is_none());
        assert!(!session.participant(alice).unwrap().has_voted);
    }

    #[test]
    fn test_apply_round_started_clears_prior_votes() {
        let (mut session, alice, _) = session_with_two();
        session.current_round = Some(Round::new(None, Utc::now()));
        session.apply_event(&DomainEvent::VoteCast {
            participant_id: alice,
            vote: Vote::from("3"),
        });

        let next = Round::new(Some("Login bug".to_string()), Utc::now());
        session.apply_event(&DomainEvent::RoundStarted {
            issue_label: next.issue_label.clone(),
            round: Some(next.clone()),
        });

        let round = session.current_round.as_ref().unwrap();
        assert_eq!(round.id, next.id);
        assert!(round.votes.is_empty());
        assert!(!session.participant(alice).unwrap().has_voted);
    }

    #[test]
    fn test_apply_reveal_twice_appends_history_once() {
        let (mut session, alice, bob) = session_with_two();
        let mut round = Round::new(None, Utc::now());
        round.votes.insert(alice, Vote::from("3"));
        round.votes.insert(bob, Vote::from("5"));
        round.reveal(Utc::now());

        let event = DomainEvent::VotesRevealed {
            round: Some(round.clone()),
        };
        session.apply_event(&event);
        session.apply_event(&event);

        assert_eq!(session.history.len(), 1);
        assert_eq!(session.current_round.as_ref().unwrap().id, round.id);
    }

    #[test]
    fn test_apply_participant_joined_replaces_existing_entry() {
        let (mut session, alice, _) = session_with_two();
        let roster_before = session.participants.len();

        let mut rejoined = Participant::new(alice, "Alice (laptop)");
        rejoined.online = true;
        session.apply_event(&DomainEvent::ParticipantJoined {
            participant: rejoined,
        });

        assert_eq!(session.participants.len(), roster_before);
        let alice_entry = session.participant(alice).unwrap();
        assert_eq!(alice_entry.name, "Alice (laptop)");
        assert!(alice_entry.online);
    }

    #[test]
    fn test_apply_participant_left_marks_offline() {
        let (mut session, _, bob) = session_with_two();

        session.apply_event(&DomainEvent::ParticipantLeft { participant_id: bob });

        let entry = session.participant(bob).unwrap();
        assert!(!entry.online);
        assert_eq!(session.online_count(), 1);
    }

    #[test]
    fn test_voting_system_cards() {
        assert!(VotingSystem::Fibonacci.cards().contains(&"13"));
        assert!(VotingSystem::TShirts.cards().contains(&"XL"));
        assert!(VotingSystem::PowersOfTwo.cards().contains(&"64"));
    }
}
