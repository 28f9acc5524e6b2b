//! Local session mirror.
//!
//! The mirror is the agent's optimistic copy of the shared session. The
//! agent owns all mutation; outside layers (UI state, bindings) observe it
//! through the watch-based subscribe contract and never write to it. The
//! merge rules are [`Session::apply_event`] - the same rules the
//! coordinator's registry uses - so applying the broadcast stream, echoes
//! included, converges with the authoritative state.

use poker_protocol::{DomainEvent, Session};
use tokio::sync::watch;

/// Observable local copy of the session.
#[derive(Debug)]
pub struct SessionMirror {
    tx: watch::Sender<Option<Session>>,
}

impl Default for SessionMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMirror {
    /// Create an empty mirror (no session).
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Subscribe to mirror updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    /// Replace the mirror with an authoritative snapshot (join ack).
    pub fn reset(&self, session: Session) {
        self.tx.send_replace(Some(session));
    }

    /// Drop the mirrored session entirely (non-retryable teardown).
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Merge one domain event into the mirror. No-op while no session is
    /// mirrored.
    pub fn apply(&self, event: &DomainEvent) {
        self.tx.send_modify(|state| {
            if let Some(session) = state.as_mut() {
                session.apply_event(event);
            }
        });
    }

    /// Current snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use poker_protocol::{ParticipantId, Round, Vote};

    fn mirrored_session() -> (SessionMirror, ParticipantId) {
        let alice = ParticipantId::new();
        let mut session = Session::new("Sprint", alice, "Alice", Utc::now());
        session.current_round = Some(Round::new(None, Utc::now()));
        let mirror = SessionMirror::new();
        mirror.reset(session);
        (mirror, alice)
    }

    #[test]
    fn test_apply_without_session_is_noop() {
        let mirror = SessionMirror::new();
        mirror.apply(&DomainEvent::ParticipantLeft {
            participant_id: ParticipantId::new(),
        });
        assert!(mirror.snapshot().is_none());
    }

    #[test]
    fn test_echoed_vote_applies_idempotently() {
        let (mirror, alice) = mirrored_session();
        let event = DomainEvent::VoteCast {
            participant_id: alice,
            vote: Vote::from("5"),
        };

        // Optimistic local application followed by the echoed broadcast.
        mirror.apply(&event);
        mirror.apply(&event);

        let session = mirror.snapshot().unwrap();
        let round = session.current_round.as_ref().unwrap();
        assert_eq!(round.votes.len(), 1);
        assert!(session.participant(alice).unwrap().has_voted);
    }

    #[test]
    fn test_subscribers_observe_updates() {
        let (mirror, alice) = mirrored_session();
        let rx = mirror.subscribe();

        mirror.apply(&DomainEvent::VoteCast {
            participant_id: alice,
            vote: Vote::from("3"),
        });

        let seen = rx.borrow();
        let session = seen.as_ref().unwrap();
        assert!(session.participant(alice).unwrap().has_voted);
    }

    #[test]
    fn test_clear_drops_session() {
        let (mirror, _) = mirrored_session();
        mirror.clear();
        assert!(mirror.snapshot().is_none());
    }
}
