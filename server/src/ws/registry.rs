use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::HubError;
use crate::ws::{ConnectionId, ConnectionSender};

/// Role a participant claims via `user-info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Participant,
    Staff,
}

impl Role {
    pub fn from_is_staff(is_staff: bool) -> Self {
        if is_staff {
            Role::Staff
        } else {
            Role::Participant
        }
    }
}

/// Descriptive data attached to a registry entry. Never affects routing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// Empty means "not announced yet"; a placeholder is derived from the id.
    pub display_name: String,
    pub role: Role,
    /// Client-claimed user id from `user-info`. Informational only.
    pub user_id: Option<String>,
}

/// A live connection as stored in the registry.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub sender: ConnectionSender,
    pub display_name: String,
    pub role: Role,
    pub user_id: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// Placeholder display name: `User` plus the first six characters of `key`.
pub fn default_display_name(key: &str) -> String {
    format!("User {}", key.chars().take(6).collect::<String>())
}

/// Concurrency-safe map of live connections, keyed by server-assigned id.
///
/// Cloning is cheap and every clone shares the same map. All mutations take
/// the write lock, and readers copy what they need before releasing it, so
/// no caller ever delivers while holding the lock.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Connection>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Connection>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection under a freshly generated id.
    ///
    /// Fails only when the outbox is already closed, i.e. the handle can
    /// never be written to.
    pub fn admit(
        &self,
        sender: ConnectionSender,
        metadata: ConnectionMetadata,
    ) -> Result<ConnectionId, HubError> {
        self.admit_with(sender, metadata, |_, _| ())
            .map(|(id, ())| id)
    }

    /// Register a connection and run `announce` before any other registry
    /// operation can interleave.
    ///
    /// `announce` receives the new entry and every other entry. It must only
    /// enqueue frames (never await or block); admissions and removals stay
    /// ordered with respect to what it sends.
    pub fn admit_with<F, R>(
        &self,
        sender: ConnectionSender,
        metadata: ConnectionMetadata,
        announce: F,
    ) -> Result<(ConnectionId, R), HubError>
    where
        F: FnOnce(&Connection, &[&Connection]) -> R,
    {
        if sender.is_closed() {
            return Err(HubError::AdmissionFailed);
        }

        let mut map = self.write();
        let mut id = uuid::Uuid::new_v4().to_string();
        while map.contains_key(&id) {
            id = uuid::Uuid::new_v4().to_string();
        }

        let display_name = if metadata.display_name.is_empty() {
            default_display_name(&id)
        } else {
            metadata.display_name
        };

        let conn = Connection {
            id: id.clone(),
            sender,
            display_name,
            role: metadata.role,
            user_id: metadata.user_id,
            joined_at: Utc::now(),
        };

        let others: Vec<&Connection> = map.values().collect();
        let announced = announce(&conn, &others);
        map.insert(id.clone(), conn);

        tracing::debug!(connection_id = %id, connections = map.len(), "Connection registered");
        Ok((id, announced))
    }

    /// Look up a connection. `None` means the id is not registered.
    pub fn lookup(&self, id: &str) -> Option<Connection> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Remove a connection. Idempotent: removing an absent id is a no-op.
    ///
    /// Returns the removed entry, so exactly one of several concurrent
    /// callers sees `Some` and can announce the departure.
    pub fn remove(&self, id: &str) -> Option<Connection> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            tracing::debug!(connection_id = %id, "Connection unregistered");
        }
        removed
    }

    /// Attach display name, role and claimed user id to an entry.
    /// Returns false if the connection is gone.
    pub fn update_metadata(&self, id: &str, metadata: ConnectionMetadata) -> bool {
        let mut map = self.write();
        match map.get_mut(id) {
            Some(conn) => {
                if !metadata.display_name.is_empty() {
                    conn.display_name = metadata.display_name;
                }
                conn.role = metadata.role;
                if metadata.user_id.is_some() {
                    conn.user_id = metadata.user_id;
                }
                true
            }
            None => false,
        }
    }

    /// Rename a connection. Returns false if the connection is gone.
    pub fn rename(&self, id: &str, display_name: &str) -> bool {
        match self.write().get_mut(id) {
            Some(conn) => {
                conn.display_name = display_name.to_string();
                true
            }
            None => false,
        }
    }

    /// Copy of every registered connection at one instant.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.read().values().cloned().collect()
    }

    /// Apply `f` to a consistent snapshot. The lock is released before `f` runs.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Connection),
    {
        for conn in self.snapshot() {
            f(&conn);
        }
    }

    /// Ids of all registered connections other than `id`.
    pub fn ids_except(&self, id: &str) -> Vec<ConnectionId> {
        self.read()
            .keys()
            .filter(|key| key.as_str() != id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
