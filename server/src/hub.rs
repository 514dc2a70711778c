//! One real-time hub per room: registry, poll state and a handle to the
//! persistence adapter, plus dispatch of decoded client envelopes.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::chat::relay as chat_relay;
use crate::db::ChatStore;
use crate::error::HubError;
use crate::poll::handler as poll_handler;
use crate::poll::state::{PollSnapshot, PollState};
use crate::signaling::router;
use crate::ws::protocol::{decode_client_event, ClientEvent};
use crate::ws::{ConnectionId, ConnectionRegistry, ConnectionSender};

/// Room used by the bare `/ws` endpoint.
pub const DEFAULT_ROOM: &str = "default";

/// Room behind the legacy `/ws_poll` endpoint. Its clients expect a
/// `participant-joined` notice on every join.
pub const LEGACY_POLL_ROOM: &str = "poll";

/// Maximum room name length.
const MAX_ROOM_NAME_LEN: usize = 64;

/// Room names are 1-64 characters of ASCII letters, digits, `-` and `_`.
pub fn is_valid_room_name(room: &str) -> bool {
    !room.is_empty()
        && room.len() <= MAX_ROOM_NAME_LEN
        && room
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Registry + poll state machine for one room.
///
/// Poll operations hold `poll` while they snapshot the registry and enqueue
/// their envelopes, so lock order is always poll, then registry. Nothing
/// here awaits while a lock is held.
pub struct Hub {
    room: String,
    registry: ConnectionRegistry,
    poll: Mutex<PollState>,
    store: Arc<dyn ChatStore>,
}

impl Hub {
    pub fn new(room: impl Into<String>, store: Arc<dyn ChatStore>) -> Self {
        Self {
            room: room.into(),
            registry: ConnectionRegistry::new(),
            poll: Mutex::new(PollState::new()),
            store,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Whether joins are also announced as `participant-joined`.
    pub fn announces_participants(&self) -> bool {
        self.room == LEGACY_POLL_ROOM
    }

    pub(crate) fn poll_state(&self) -> MutexGuard<'_, PollState> {
        self.poll.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the active poll, if any.
    pub fn active_poll(&self) -> Option<PollSnapshot> {
        self.poll_state().active().map(|poll| poll.snapshot())
    }

    /// Admit a new connection and run the existing-peers / new-peer exchange.
    pub fn connect(&self, sender: ConnectionSender) -> Result<ConnectionId, HubError> {
        let id = router::announce(self, sender)?;
        tracing::info!(
            room = %self.room,
            connection_id = %id,
            connections = self.registry.len(),
            "Peer joined"
        );
        Ok(id)
    }

    /// Decode and handle one inbound text frame. Malformed frames are
    /// logged and dropped; the connection stays open.
    pub fn handle_text(&self, id: &str, text: &str) {
        match decode_client_event(text) {
            Ok(event) => self.dispatch(id, event),
            Err(e) => {
                tracing::warn!(
                    room = %self.room,
                    connection_id = %id,
                    error = %e,
                    "Dropping inbound frame"
                );
            }
        }
    }

    /// Route a decoded envelope from connection `id`.
    pub fn dispatch(&self, id: &str, event: ClientEvent) {
        // Frames still buffered from an evicted connection are not acted on
        if !self.registry.contains(id) {
            tracing::debug!(connection_id = %id, "Ignoring frame from unregistered connection");
            return;
        }

        match event {
            ClientEvent::UserInfo {
                user_id,
                is_staff,
                user_name,
            } => router::handle_user_info(self, id, &user_id, is_staff, user_name),
            ClientEvent::ParticipantUpdated { participant_name } => {
                router::handle_participant_updated(self, id, &participant_name)
            }
            ClientEvent::Offer(req) => router::relay(self, id, router::SignalKind::Offer, req),
            ClientEvent::Answer(req) => router::relay(self, id, router::SignalKind::Answer, req),
            ClientEvent::IceCandidate(req) => {
                router::relay(self, id, router::SignalKind::IceCandidate, req)
            }
            ClientEvent::ChatMessage { message, timestamp } => {
                if let Some(ts) = timestamp {
                    tracing::trace!(connection_id = %id, client_timestamp = %ts, "Ignoring client timestamp");
                }
                chat_relay::handle_chat_message(self, id, &message)
            }
            ClientEvent::PollCreated { poll } => poll_handler::handle_poll_created(self, id, poll),
            ClientEvent::PollVote {
                poll_id,
                option_index,
            } => poll_handler::handle_poll_vote(self, id, &poll_id, option_index),
            ClientEvent::PollEnded { poll_id } => {
                poll_handler::handle_poll_ended(self, id, poll_id.as_deref())
            }
        }
    }

    /// Evict a connection after its read loop ended. Returns false if it was
    /// already gone (for example evicted by a failed delivery).
    pub fn disconnect(&self, id: &str) -> bool {
        router::depart(self, id)
    }

    /// Hand a persistence call to the blocking pool. Errors are logged only.
    ///
    /// Must be called without holding hub locks. Outside a tokio runtime the
    /// call runs inline.
    pub fn mirror<F>(&self, what: &'static str, op: F)
    where
        F: FnOnce(&dyn ChatStore) -> Result<(), HubError> + Send + 'static,
    {
        let store = self.store.clone();
        let room = self.room.clone();
        let run = move || {
            if let Err(e) = op(store.as_ref()) {
                tracing::warn!(room = %room, what, error = %e, "Persistence mirror failed");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(run);
            }
            Err(_) => run(),
        }
    }
}

/// Room name → hub. Hubs are created on first use and live for the rest of
/// the process.
#[derive(Clone)]
pub struct RoomDirectory {
    rooms: Arc<DashMap<String, Arc<Hub>>>,
    store: Arc<dyn ChatStore>,
}

impl RoomDirectory {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            store,
        }
    }

    /// Get a room's hub, creating it if needed.
    pub fn get_or_create(&self, room: &str) -> Arc<Hub> {
        self.rooms
            .entry(room.to_string())
            .or_insert_with(|| {
                tracing::info!(room = %room, "Room created");
                Arc::new(Hub::new(room, self.store.clone()))
            })
            .value()
            .clone()
    }

    pub fn get(&self, room: &str) -> Option<Arc<Hub>> {
        self.rooms.get(room).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
