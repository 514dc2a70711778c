use axum::{routing::get, Router};

use crate::chat::history;
use crate::poll::handler as poll_handler;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoints, one hub per room
    let ws_routes = Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/ws/{room}", get(ws_handler::ws_upgrade_room));

    // Endpoints from before rooms existed, each pinned to a fixed room
    let legacy_routes = Router::new()
        .route("/ws_poll", get(ws_handler::ws_upgrade_poll))
        .route("/ws_discussion", get(ws_handler::ws_upgrade_discussion))
        .route("/chat/history", get(history::get_default_history));

    let api_routes = Router::new()
        .route("/api/rooms/{room}/chat/history", get(history::get_history))
        .route("/api/rooms/{room}/poll", get(poll_handler::get_active_poll));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(legacy_routes)
        .merge(api_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
