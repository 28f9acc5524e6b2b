//! Client agent error types.

use thiserror::Error;

/// Reconciliation agent error type.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Establishing or using the transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reading or writing the durable pending-vote store failed.
    #[error("Vote store error: {0}")]
    Store(String),

    /// The agent task is gone (left or failed terminally).
    #[error("Agent unavailable: {0}")]
    Mailbox(String),
}
