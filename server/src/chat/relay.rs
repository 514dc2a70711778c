//! Chat messages received on the hub socket.
//!
//! Each message is stamped with server time, handed to the persistence
//! mirror, and echoed to every connection in the room, the sender included,
//! so clients render their own messages through the same path as everyone
//! else's.

use chrono::{SecondsFormat, Utc};

use crate::db::models::ChatRecord;
use crate::hub::Hub;
use crate::signaling::router::broadcast_all;
use crate::ws::protocol::ServerEvent;

/// Maximum message content length (chars).
pub const MAX_MESSAGE_LENGTH: usize = 4000;

pub fn handle_chat_message(hub: &Hub, sender_id: &str, message: &str) {
    if message.trim().is_empty() {
        return;
    }
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        tracing::warn!(
            room = %hub.room(),
            connection_id = %sender_id,
            "Dropping chat message over {} chars",
            MAX_MESSAGE_LENGTH
        );
        return;
    }

    let Some(sender) = hub.registry().lookup(sender_id) else {
        return;
    };

    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let record = ChatRecord {
        room_id: hub.room().to_string(),
        sender_id: sender.id.clone(),
        sender_name: sender.display_name.clone(),
        user_id: sender.user_id.clone(),
        message: message.to_string(),
        timestamp: timestamp.clone(),
    };
    hub.mirror("chat-message", move |store| store.record_chat(&record));

    broadcast_all(
        hub,
        &ServerEvent::ChatMessage {
            sender: sender.id,
            sender_name: sender.display_name,
            message: message.to_string(),
            timestamp,
        },
    );
}
