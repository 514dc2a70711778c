use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::hub::{is_valid_room_name, DEFAULT_ROOM, LEGACY_POLL_ROOM};
use crate::state::AppState;
use crate::ws::actor;

/// Room behind the pre-room `/ws_discussion` endpoint.
const LEGACY_DISCUSSION_ROOM: &str = "discussion";

/// GET /ws
/// Join the default room.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade_into(state, DEFAULT_ROOM.to_string(), ws)
}

/// GET /ws/{room}
/// Invalid room names are rejected before the upgrade.
pub async fn ws_upgrade_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if !is_valid_room_name(&room) {
        tracing::debug!(room = %room, "Rejecting upgrade for invalid room name");
        return (StatusCode::BAD_REQUEST, "invalid room name").into_response();
    }
    upgrade_into(state, room, ws)
}

/// GET /ws_poll
pub async fn ws_upgrade_poll(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade_into(state, LEGACY_POLL_ROOM.to_string(), ws)
}

/// GET /ws_discussion
pub async fn ws_upgrade_discussion(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade_into(state, LEGACY_DISCUSSION_ROOM.to_string(), ws)
}

fn upgrade_into(state: AppState, room: String, ws: WebSocketUpgrade) -> Response {
    let hub = state.rooms.get_or_create(&room);
    let keepalive = state.keepalive.clone();
    ws.on_upgrade(move |socket| actor::run_connection(socket, hub, keepalive))
}
