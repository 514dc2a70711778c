//! REST endpoint for recent chat history of a room.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::ChatRecord;
use crate::hub::{is_valid_room_name, DEFAULT_ROOM};
use crate::state::AppState;

/// Maximum page size for message history.
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub room: String,
    pub messages: Vec<ChatRecord>,
}

/// GET /api/rooms/{room}/chat/history?limit=N
/// Most recent messages of the room, oldest first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    fetch(state, room, query.limit).await
}

/// GET /chat/history
/// History of the default room.
pub async fn get_default_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    fetch(state, DEFAULT_ROOM.to_string(), query.limit).await
}

async fn fetch(
    state: AppState,
    room: String,
    limit: Option<u32>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    if !is_valid_room_name(&room) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let limit = limit.unwrap_or(state.history_limit).clamp(1, MAX_LIMIT);

    let store = state.store.clone();
    let room_for_query = room.clone();
    let messages = tokio::task::spawn_blocking(move || store.fetch_recent_chat(&room_for_query, limit))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::error!(room = %room, error = %e, "Failed to load chat history");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(HistoryResponse { room, messages }))
}
