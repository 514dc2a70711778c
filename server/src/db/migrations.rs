use rusqlite_migration::{Migrations, M};

/// Schema migrations, tracked through SQLite's user_version pragma.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: chat mirror

CREATE TABLE chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL DEFAULT 'default',
    sender_id TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    user_id TEXT,
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX idx_chat_messages_room_ts ON chat_messages(room_id, timestamp);
",
        ),
        M::up(
            "-- Migration 2: final poll results

CREATE TABLE poll_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL,
    poll_id TEXT NOT NULL,
    question TEXT NOT NULL,
    options_json TEXT NOT NULL,
    correct_option INTEGER,
    results_json TEXT NOT NULL,
    total_votes INTEGER NOT NULL,
    attendance_json TEXT NOT NULL,
    created_by TEXT NOT NULL,
    ended_at TEXT NOT NULL
);

CREATE INDEX idx_poll_results_room ON poll_results(room_id, ended_at);
",
        ),
    ])
}
