//! Pointing Poker Session Coordinator Library
//!
//! This library provides the core functionality for the session
//! coordinator - a stateful WebSocket synchronization server responsible
//! for:
//!
//! - Canonical session state: rosters, voting rounds, settings, history
//! - Relaying domain events between participants with a single
//!   authoritative copy of each session
//! - Reconciling reconnecting participants with the group's shared state
//! - Evicting silent connections and idle sessions
//!
//! # Architecture
//!
//! A single router actor owns both registries and is the serialization
//! point for all shared state:
//!
//! ```text
//! EventRouter (actor, one per process)
//! ├── owns SessionRegistry   (sessions, rosters, rounds, settings)
//! ├── owns ConnectionRegistry (live sockets + routing indexes)
//! ├── fed by N socket tasks  (one per WebSocket connection)
//! └── swept by the LivenessMonitor task
//! ```
//!
//! Each inbound message is handled to completion - registry mutation plus
//! broadcast fan-out - before the next, so no registry needs a lock.
//! Outbound delivery is per-connection fire-and-forget: a slow socket
//! never stalls its session.
//!
//! # Key Design Decisions
//!
//! - **State is ephemeral**: everything lives in process memory and is
//!   intentionally lost on restart.
//! - **Participants outlive connections**: a disconnect flips the roster
//!   entry offline (policy-configurable) so a reconnect restores prior
//!   votes.
//! - **Self-delivery**: domain-event broadcasts include the originating
//!   connection; clients apply events idempotently.
//!
//! # Modules
//!
//! - [`registry`] - session and connection registries
//! - [`router`] - the protocol state machine
//! - [`liveness`] - periodic sweeps
//! - [`handlers`] - HTTP/WebSocket surface
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types with client-safe messages

pub mod config;
pub mod errors;
pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod router;
