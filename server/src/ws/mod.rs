pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod registry;

use axum::extract::ws::Message;
use tokio::sync::mpsc;

pub use registry::{Connection, ConnectionMetadata, ConnectionRegistry, Role};

/// Server-assigned connection identifier (UUIDv4 string).
pub type ConnectionId = String;

/// Type alias for the sender half of a WebSocket connection's outbox.
/// The connection's writer task owns the receiver; once it exits, sends fail
/// and the connection is treated as unwritable.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;
