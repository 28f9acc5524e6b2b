//! Transport seam for the reconciliation agent.
//!
//! The agent is transport-agnostic: it speaks [`ClientMessage`] out and
//! [`ServerMessage`] in over a pair of channels. A production
//! implementation pumps these over a WebSocket; tests plug in an in-memory
//! fake. Either way, the receiver yielding `None` is the close signal.

use crate::errors::AgentError;
use async_trait::async_trait;
use poker_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

/// One established connection to the coordinator.
#[derive(Debug)]
pub struct Connection {
    /// Outbound frames toward the coordinator.
    pub sender: mpsc::UnboundedSender<ClientMessage>,
    /// Inbound frames from the coordinator; `None` means the transport
    /// closed.
    pub receiver: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Connection factory. Each reconnect attempt calls `connect` afresh.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn connect(&self) -> Result<Connection, AgentError>;
}
