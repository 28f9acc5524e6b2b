//! Pointing Poker Client Reconciliation Agent
//!
//! Client-side counterpart to the session coordinator. The agent keeps a
//! local optimistic copy of the shared session and reconciles it with the
//! coordinator's authoritative state across disconnects:
//!
//! - [`agent`] - the connect/heartbeat/reconnect state machine
//! - [`mirror`] - the observable local session copy (subscribe/notify; the
//!   agent is the only writer)
//! - [`backoff`] - the bounded exponential reconnect schedule
//! - [`store`] - durable holding of votes cast while offline, replayed
//!   exactly once on rejoin
//! - [`transport`] - the connection seam a real WebSocket pump (or a test
//!   fake) plugs into
//!
//! The mirror applies broadcast events with the same merge rules the
//! coordinator's registry uses, and tolerates re-receiving the client's
//! own just-applied mutations - the coordinator does not suppress
//! self-delivery.

#![warn(clippy::pedantic)]

pub mod agent;
pub mod backoff;
pub mod errors;
pub mod mirror;
pub mod store;
pub mod transport;

pub use agent::{AgentConfig, AgentHandle, AgentStatus, ReconciliationAgent};
pub use backoff::{Backoff, BackoffPolicy};
pub use errors::AgentError;
pub use mirror::SessionMirror;
pub use store::PendingVoteStore;
pub use transport::{ClientTransport, Connection};
