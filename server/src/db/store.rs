//! Persistence adapter: a best-effort mirror of chat and poll events.
//!
//! The hub never waits on this. Calls are made from the blocking pool after
//! the corresponding envelope has already been delivered, and any error is
//! logged and dropped.

use crate::db::models::{ChatRecord, PollResultRecord};
use crate::db::DbPool;
use crate::error::HubError;

/// Durable storage the hub mirrors events into.
///
/// Methods are synchronous; callers run them on `spawn_blocking`.
pub trait ChatStore: Send + Sync {
    fn record_chat(&self, record: &ChatRecord) -> Result<(), HubError>;

    /// Most recent `limit` messages of a room, oldest first.
    fn fetch_recent_chat(&self, room_id: &str, limit: u32) -> Result<Vec<ChatRecord>, HubError>;

    fn record_poll_result(&self, record: &PollResultRecord) -> Result<(), HubError>;
}

/// SQLite-backed [`ChatStore`].
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, HubError> {
        self.db
            .lock()
            .map_err(|_| HubError::PersistenceFailed("database lock poisoned".to_string()))
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, HubError> {
    serde_json::to_string(value).map_err(|e| HubError::PersistenceFailed(e.to_string()))
}

impl ChatStore for SqliteStore {
    fn record_chat(&self, record: &ChatRecord) -> Result<(), HubError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO chat_messages (room_id, sender_id, sender_name, user_id, message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.room_id,
                record.sender_id,
                record.sender_name,
                record.user_id,
                record.message,
                record.timestamp,
            ],
        )?;
        Ok(())
    }

    fn fetch_recent_chat(&self, room_id: &str, limit: u32) -> Result<Vec<ChatRecord>, HubError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT room_id, sender_id, sender_name, user_id, message, timestamp
             FROM chat_messages
             WHERE room_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let mut records = stmt
            .query_map(rusqlite::params![room_id, i64::from(limit)], |row| {
                Ok(ChatRecord {
                    room_id: row.get(0)?,
                    sender_id: row.get(1)?,
                    sender_name: row.get(2)?,
                    user_id: row.get(3)?,
                    message: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // Selected newest first; history is served oldest first
        records.reverse();
        Ok(records)
    }

    fn record_poll_result(&self, record: &PollResultRecord) -> Result<(), HubError> {
        let options_json = to_json(&record.options)?;
        let results_json = to_json(&record.results)?;
        let attendance_json = to_json(&record.attendance)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO poll_results (room_id, poll_id, question, options_json, correct_option,
                                       results_json, total_votes, attendance_json, created_by, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                record.room_id,
                record.poll_id,
                record.question,
                options_json,
                record.correct_option.map(|i| i as i64),
                results_json,
                record.total_votes as i64,
                attendance_json,
                record.created_by,
                record.ended_at,
            ],
        )?;
        Ok(())
    }
}
