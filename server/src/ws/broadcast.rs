//! Fan-out of server envelopes to registered connections.
//!
//! Delivery means enqueueing a frame into a connection's outbox; the socket
//! write happens later in that connection's writer task, outside any lock.
//! An outbox that refuses a frame belongs to a dead writer, so the recipient
//! is evicted and its departure is announced to everyone left.

use axum::extract::ws::Message;

use super::protocol::{encode_server_event, ServerEvent};
use super::ConnectionRegistry;
use crate::error::HubError;

/// Deliver `event` to every registered connection except `exclude`.
///
/// Best effort per recipient: a failed enqueue never stops delivery to the
/// others. Returns the number of connections the frame was enqueued for.
pub fn broadcast(registry: &ConnectionRegistry, event: &ServerEvent, exclude: Option<&str>) -> usize {
    let msg = match encode_server_event(event) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "Failed to encode envelope");
            return 0;
        }
    };
    let delivered = fan_out(registry, &msg, exclude);
    tracing::trace!(kind = event.kind(), delivered, "Broadcast envelope");
    delivered
}

/// Deliver `event` to a single connection.
pub fn send_to(registry: &ConnectionRegistry, id: &str, event: &ServerEvent) -> Result<(), HubError> {
    let conn = registry
        .lookup(id)
        .ok_or_else(|| HubError::UnknownTarget { id: id.to_string() })?;
    let msg = encode_server_event(event)?;

    if conn.sender.send(msg).is_err() {
        evict(registry, id);
        return Err(HubError::DeliveryFailed { id: id.to_string() });
    }
    Ok(())
}

/// Remove `id` and, if this call performed the removal, tell everyone left.
///
/// Safe to call from several paths for the same connection (reader exit,
/// writer failure, failed fan-out): the departure is announced at most once.
pub fn evict(registry: &ConnectionRegistry, id: &str) -> bool {
    if registry.remove(id).is_none() {
        return false;
    }
    tracing::info!(connection_id = %id, remaining = registry.len(), "Peer disconnected");
    broadcast(
        registry,
        &ServerEvent::PeerDisconnected { id: id.to_string() },
        None,
    );
    true
}

/// Enqueue one encoded frame for each recipient, evicting the unwritable ones.
///
/// Departures discovered here are announced in the same loop instead of by
/// recursion, so a cascade of dead outboxes cannot grow the stack.
fn fan_out(registry: &ConnectionRegistry, msg: &Message, exclude: Option<&str>) -> usize {
    let mut delivered = 0;
    let mut departed = Vec::new();

    for conn in registry.snapshot() {
        if exclude == Some(conn.id.as_str()) {
            continue;
        }
        if conn.sender.send(msg.clone()).is_ok() {
            delivered += 1;
        } else if registry.remove(&conn.id).is_some() {
            tracing::warn!(connection_id = %conn.id, "Delivery failed, evicting connection");
            departed.push(conn.id);
        }
    }

    while let Some(id) = departed.pop() {
        let notice = match encode_server_event(&ServerEvent::PeerDisconnected { id: id.clone() }) {
            Ok(notice) => notice,
            Err(_) => continue,
        };
        for conn in registry.snapshot() {
            if conn.sender.send(notice.clone()).is_err() && registry.remove(&conn.id).is_some() {
                tracing::warn!(connection_id = %conn.id, "Delivery failed, evicting connection");
                departed.push(conn.id);
            }
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::ConnectionMetadata;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn admit(registry: &ConnectionRegistry) -> (String, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.admit(tx, ConnectionMetadata::default()).unwrap();
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                out.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        out
    }

    fn new_peer(id: &str) -> ServerEvent {
        ServerEvent::NewPeer { id: id.to_string() }
    }

    #[test]
    fn test_broadcast_excludes_one_and_reaches_everyone_else_once() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = admit(&registry);
        let (b, mut rx_b) = admit(&registry);
        let (_c, mut rx_c) = admit(&registry);

        let delivered = broadcast(&registry, &new_peer("x"), Some(&b));
        assert_eq!(delivered, 2);

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 0);
        assert_eq!(drain(&mut rx_c).len(), 1);
    }

    #[test]
    fn test_failed_recipient_is_evicted_and_announced() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = admit(&registry);
        let (dead, rx_dead) = admit(&registry);
        let (_c, mut rx_c) = admit(&registry);
        drop(rx_dead);

        broadcast(&registry, &new_peer("x"), None);

        assert!(registry.lookup(&dead).is_none());
        for rx in [&mut rx_a, &mut rx_c] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0]["type"], "new-peer");
            assert_eq!(frames[1]["type"], "peer-disconnected");
            assert_eq!(frames[1]["id"], dead.as_str());
        }
    }

    #[test]
    fn test_cascading_failures_are_each_announced_once() {
        let registry = ConnectionRegistry::new();
        let (_alive, mut rx_alive) = admit(&registry);
        let (_d1, rx_d1) = admit(&registry);
        let (_d2, rx_d2) = admit(&registry);
        drop(rx_d1);
        drop(rx_d2);

        broadcast(&registry, &new_peer("x"), None);

        assert_eq!(registry.len(), 1);
        let frames = drain(&mut rx_alive);
        let departures: Vec<_> = frames
            .iter()
            .filter(|f| f["type"] == "peer-disconnected")
            .collect();
        assert_eq!(departures.len(), 2);
        assert_ne!(departures[0]["id"], departures[1]["id"]);
    }

    #[test]
    fn test_send_to_unknown_target() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = admit(&registry);
        let result = send_to(&registry, "missing", &new_peer("x"));
        assert!(matches!(result, Err(HubError::UnknownTarget { .. })));
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_send_to_dead_target_evicts() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = admit(&registry);
        let (dead, rx_dead) = admit(&registry);
        drop(rx_dead);

        let result = send_to(&registry, &dead, &new_peer("x"));
        assert!(matches!(result, Err(HubError::DeliveryFailed { .. })));
        assert!(registry.lookup(&dead).is_none());

        let frames = drain(&mut rx_a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "peer-disconnected");
    }

    #[test]
    fn test_evict_announces_at_most_once() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = admit(&registry);
        let (b, _rx_b) = admit(&registry);

        assert!(evict(&registry, &b));
        assert!(!evict(&registry, &b));
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn test_single_producer_order_is_preserved() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = admit(&registry);
        let (_b, mut rx_b) = admit(&registry);

        for i in 0..20 {
            broadcast(&registry, &new_peer(&i.to_string()), None);
        }

        for rx in [&mut rx_a, &mut rx_b] {
            let ids: Vec<String> = drain(rx)
                .into_iter()
                .map(|f| f["id"].as_str().unwrap().to_string())
                .collect();
            let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn test_recipient_set_can_change_between_broadcasts() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = admit(&registry);
        assert_eq!(broadcast(&registry, &new_peer("1"), None), 1);

        let (_b, mut rx_b) = admit(&registry);
        assert_eq!(broadcast(&registry, &new_peer("2"), None), 2);

        registry.remove(&a);
        assert_eq!(broadcast(&registry, &new_peer("3"), None), 1);

        assert_eq!(drain(&mut rx_a).len(), 2);
        assert_eq!(drain(&mut rx_b).len(), 2);
    }
}
