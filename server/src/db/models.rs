/// Database row types for the hub's mirror tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use serde::Serialize;

use crate::ws::protocol::VoteTally;

/// Chat message record in the chat_messages table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub room_id: String,
    /// Server-assigned connection id of the sender
    pub sender_id: String,
    pub sender_name: String,
    /// User id the client claimed via user-info, if any
    pub user_id: Option<String>,
    pub message: String,
    /// RFC 3339, UTC
    pub timestamp: String,
}

/// Final tally of an ended poll in the poll_results table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResultRecord {
    pub room_id: String,
    pub poll_id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_option: Option<usize>,
    pub results: VoteTally,
    pub total_votes: u64,
    pub attendance: Vec<String>,
    pub created_by: String,
    pub ended_at: String,
}
