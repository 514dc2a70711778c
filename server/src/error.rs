use thiserror::Error;

/// Failures raised inside the connection hub.
///
/// None of these are fatal to the hub itself: each one is confined to a
/// single connection or a single envelope.
#[derive(Debug, Error)]
pub enum HubError {
    /// A new connection could not be registered (its outbox was already closed).
    #[error("connection admission failed")]
    AdmissionFailed,

    /// Enqueueing a frame for one recipient failed; the recipient has been evicted.
    #[error("delivery to connection {id} failed")]
    DeliveryFailed { id: String },

    /// A targeted relay named a connection that is not registered.
    #[error("unknown target connection {id}")]
    UnknownTarget { id: String },

    /// An inbound frame did not decode into a known envelope kind.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The persistence adapter reported an error.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),
}

impl From<rusqlite::Error> for HubError {
    fn from(err: rusqlite::Error) -> Self {
        HubError::PersistenceFailed(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::MalformedEnvelope(err.to_string())
    }
}
