use std::sync::Arc;

use crate::config::KeepaliveConfig;
use crate::db::ChatStore;
use crate::hub::RoomDirectory;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Persistence adapter shared by every room
    pub store: Arc<dyn ChatStore>,
    /// Room name -> hub
    pub rooms: RoomDirectory,
    /// Default page size for chat history
    pub history_limit: u32,
    /// Ping/pong monitor settings; disabled unless configured
    pub keepalive: KeepaliveConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatStore>, history_limit: u32, keepalive: KeepaliveConfig) -> Self {
        Self {
            rooms: RoomDirectory::new(store.clone()),
            store,
            history_limit,
            keepalive,
        }
    }
}
