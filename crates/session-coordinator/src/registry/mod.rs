//! In-memory registries owned by the event router.
//!
//! Both registries are plain data structures without interior locking: the
//! router's mailbox is the single serialization point, so every mutation
//! happens on one task. State is intentionally process-memory only and lost
//! on restart.

pub mod connections;
pub mod sessions;

pub use connections::{ConnectionId, ConnectionRecord, ConnectionRegistry};
pub use sessions::SessionRegistry;
