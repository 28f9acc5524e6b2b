//! Shared protocol for Pointing Poker.
//!
//! This crate defines everything both sides of the wire agree on:
//!
//! - Typed identifiers ([`ids`])
//! - The session data model ([`session`], [`round`]) - roster, settings,
//!   voting rounds and their revealed statistics
//! - The wire messages exchanged over the socket ([`messages`])
//!
//! The coordinator's registries and the client's reconciliation mirror both
//! operate on the [`session::Session`] model, so a client that applies the
//! broadcast event stream converges with the coordinator's authoritative
//! state. [`session::Session::apply_event`] is written to be idempotent:
//! re-applying an echoed event (every sender receives its own broadcasts)
//! does not change observable state.

#![warn(clippy::pedantic)]

pub mod ids;
pub mod messages;
pub mod round;
pub mod session;

pub use ids::{ParticipantId, RoundId, SessionId};
pub use messages::{ClientMessage, DomainEvent, ServerMessage};
pub use round::{Round, Vote};
pub use session::{
    Participant, Permission, Session, SessionSettings, SessionSummary, SettingsPatch, VotingSystem,
};
