use axum::extract::ws::Message;

use crate::error::HubError;
use crate::hub::Hub;
use crate::ws::broadcast::{broadcast, evict, send_to};
use crate::ws::protocol::{encode_server_event, ServerEvent, SignalRelay, SignalRequest};
use crate::ws::registry::default_display_name;
use crate::ws::{ConnectionId, ConnectionMetadata, ConnectionSender, Role};

/// Which negotiation message is being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    fn into_event(self, relay: SignalRelay) -> ServerEvent {
        match self {
            SignalKind::Offer => ServerEvent::Offer(relay),
            SignalKind::Answer => ServerEvent::Answer(relay),
            SignalKind::IceCandidate => ServerEvent::IceCandidate(relay),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }
}

/// Admit a connection and introduce it to the room.
///
/// Under the registry lock: the newcomer gets `existing-peers` (everyone
/// already present) and `participant-id` (its own id), and everyone already
/// present gets `new-peer`. Doing all three before the lock is released means
/// two concurrent joiners each learn about the other exactly once.
///
/// In the legacy poll room everyone, the newcomer included, also gets
/// `participant-joined` with the newcomer's display name.
pub fn announce(hub: &Hub, sender: ConnectionSender) -> Result<ConnectionId, HubError> {
    let legacy_notice = hub.announces_participants();
    let (id, failed) = hub.registry().admit_with(
        sender,
        ConnectionMetadata::default(),
        |new, others| {
            let mut failed: Vec<ConnectionId> = Vec::new();

            let existing = ServerEvent::ExistingPeers {
                peers: others.iter().map(|c| c.id.clone()).collect(),
            };
            let own_id = ServerEvent::ParticipantId {
                participant_id: new.id.clone(),
            };
            for event in [&existing, &own_id] {
                if let Some(msg) = encode(event) {
                    if new.sender.send(msg).is_err() {
                        failed.push(new.id.clone());
                        break;
                    }
                }
            }

            if let Some(msg) = encode(&ServerEvent::NewPeer { id: new.id.clone() }) {
                for other in others {
                    if other.sender.send(msg.clone()).is_err() {
                        failed.push(other.id.clone());
                    }
                }
            }

            if legacy_notice {
                let joined = ServerEvent::ParticipantJoined {
                    participant_id: new.id.clone(),
                    participant_name: new.display_name.clone(),
                };
                if let Some(msg) = encode(&joined) {
                    for conn in others.iter().copied().chain(std::iter::once(new)) {
                        if !failed.contains(&conn.id) && conn.sender.send(msg.clone()).is_err() {
                            failed.push(conn.id.clone());
                        }
                    }
                }
            }
            failed
        },
    )?;

    for dead in &failed {
        evict(hub.registry(), dead);
    }
    if failed.contains(&id) {
        return Err(HubError::AdmissionFailed);
    }
    Ok(id)
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match encode_server_event(event) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "Failed to encode envelope");
            None
        }
    }
}

/// `user-info`: attach display name and role. Routing is unaffected.
pub fn handle_user_info(
    hub: &Hub,
    id: &str,
    user_id: &str,
    is_staff: bool,
    user_name: Option<String>,
) {
    let user_id = user_id.trim();
    let display_name = match user_name.map(|n| n.trim().to_string()) {
        Some(name) if !name.is_empty() => name,
        _ if !user_id.is_empty() => default_display_name(user_id),
        _ => String::new(),
    };

    let updated = hub.registry().update_metadata(
        id,
        ConnectionMetadata {
            display_name: display_name.clone(),
            role: Role::from_is_staff(is_staff),
            user_id: (!user_id.is_empty()).then(|| user_id.to_string()),
        },
    );
    if updated {
        tracing::debug!(
            room = %hub.room(),
            connection_id = %id,
            display_name = %display_name,
            is_staff,
            "User info attached"
        );
    }
}

/// `participant-updated`: rename the connection.
pub fn handle_participant_updated(hub: &Hub, id: &str, participant_name: &str) {
    let name = participant_name.trim();
    if name.is_empty() {
        return;
    }
    hub.registry().rename(id, name);
}

/// Forward an offer/answer/candidate to its target only, with `from` set to
/// the authenticated sender. Unknown targets are dropped silently.
pub fn relay(hub: &Hub, from: &str, kind: SignalKind, req: SignalRequest) {
    if req.to == from {
        tracing::debug!(connection_id = %from, kind = kind.as_str(), "Dropping self-addressed relay");
        return;
    }

    let to = req.to.clone();
    let event = kind.into_event(SignalRelay::from_request(from, req));

    match send_to(hub.registry(), &to, &event) {
        Ok(()) => {
            tracing::trace!(from = %from, to = %to, kind = kind.as_str(), "Relayed signal");
        }
        Err(e) => {
            tracing::debug!(from = %from, to = %to, kind = kind.as_str(), error = %e, "Signal dropped");
        }
    }
}

/// Remove a connection and broadcast `peer-disconnected` to the rest.
pub fn depart(hub: &Hub, id: &str) -> bool {
    let departed = evict(hub.registry(), id);
    if departed {
        tracing::info!(room = %hub.room(), connection_id = %id, "Peer left");
    }
    departed
}

/// Send an envelope to everyone in the room, the sender included.
pub fn broadcast_all(hub: &Hub, event: &ServerEvent) -> usize {
    broadcast(hub.registry(), event, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory_db, SqliteStore};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn hub() -> Hub {
        Hub::new("default", Arc::new(SqliteStore::new(init_memory_db().unwrap())))
    }

    fn connect(hub: &Hub) -> (String, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.connect(tx).unwrap();
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

    #[test]
    fn test_join_sequence_for_two_peers() {
        let hub = hub();
        let (c1, mut rx1) = connect(&hub);
        assert_eq!(
            drain(&mut rx1),
            vec![
                json!({"type": "existing-peers", "peers": []}),
                json!({"type": "participant-id", "participantId": c1}),
            ]
        );

        let (c2, mut rx2) = connect(&hub);
        assert_eq!(drain(&mut rx1), vec![json!({"type": "new-peer", "id": c2})]);
        assert_eq!(
            drain(&mut rx2),
            vec![
                json!({"type": "existing-peers", "peers": [c1]}),
                json!({"type": "participant-id", "participantId": c2}),
            ]
        );
    }

    #[test]
    fn test_legacy_poll_room_announces_participant_joined() {
        let hub = Hub::new(
            crate::hub::LEGACY_POLL_ROOM,
            Arc::new(SqliteStore::new(init_memory_db().unwrap())),
        );
        let (c1, mut rx1) = connect(&hub);
        let first = drain(&mut rx1);
        assert_eq!(first.len(), 3);
        assert_eq!(first[1], json!({"type": "participant-id", "participantId": c1}));
        assert_eq!(first[2]["type"], "participant-joined");
        assert_eq!(first[2]["participantId"], c1.as_str());

        let (c2, mut rx2) = connect(&hub);
        let joined = json!({
            "type": "participant-joined",
            "participantId": c2,
            "participantName": crate::ws::registry::default_display_name(&c2),
        });
        assert_eq!(
            drain(&mut rx1),
            vec![json!({"type": "new-peer", "id": c2}), joined.clone()]
        );
        assert_eq!(drain(&mut rx2).last(), Some(&joined));
    }

    #[test]
    fn test_other_rooms_do_not_announce_participant_joined() {
        let hub = hub();
        let (_c1, mut rx1) = connect(&hub);
        connect(&hub);
        assert!(drain(&mut rx1)
            .iter()
            .all(|frame| frame["type"] != "participant-joined"));
    }

    #[test]
    fn test_relay_forwards_top_level_fields() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub);
        let (b, mut rx_b) = connect(&hub);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let frame = json!({"type": "ice-candidate", "to": b, "candidate": {"candidate": "x", "sdpMid": "0"}});
        hub.handle_text(&a, &frame.to_string());

        assert_eq!(
            drain(&mut rx_b),
            vec![json!({"type": "ice-candidate", "from": a, "candidate": {"candidate": "x", "sdpMid": "0"}})]
        );
    }

    #[test]
    fn test_relay_reaches_only_target_with_rewritten_sender() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub);
        let (b, mut rx_b) = connect(&hub);
        let (_c, mut rx_c) = connect(&hub);
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            drain(rx);
        }

        let frame = json!({"type": "offer", "to": b, "from": "spoofed", "payload": {"sdp": "v=0"}});
        hub.handle_text(&a, &frame.to_string());

        assert_eq!(
            drain(&mut rx_b),
            vec![json!({"type": "offer", "from": a, "payload": {"sdp": "v=0"}})]
        );
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_relay_to_unknown_target_is_silently_dropped() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub);
        let (_b, mut rx_b) = connect(&hub);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let frame = json!({"type": "answer", "to": "no-such-peer", "payload": {}});
        hub.handle_text(&a, &frame.to_string());

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert!(hub.registry().contains(&a));
    }

    #[test]
    fn test_self_addressed_relay_is_dropped() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub);
        drain(&mut rx_a);

        let frame = json!({"type": "ice-candidate", "to": a, "payload": {"candidate": "x"}});
        hub.handle_text(&a, &frame.to_string());
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_user_info_sets_name_and_role() {
        let hub = hub();
        let (a, _rx_a) = connect(&hub);

        hub.handle_text(&a, r#"{"type":"user-info","userId":"staff123456","isStaff":true}"#);
        let conn = hub.registry().lookup(&a).unwrap();
        assert_eq!(conn.display_name, "User staff1");
        assert_eq!(conn.role, Role::Staff);
        assert_eq!(conn.user_id.as_deref(), Some("staff123456"));

        hub.handle_text(&a, r#"{"type":"participant-updated","participantName":"Dr. Lee"}"#);
        assert_eq!(hub.registry().lookup(&a).unwrap().display_name, "Dr. Lee");
    }

    #[test]
    fn test_user_info_with_short_id_does_not_panic() {
        let hub = hub();
        let (a, _rx_a) = connect(&hub);
        hub.handle_text(&a, r#"{"type":"user-info","userId":"ab","isStaff":false}"#);
        assert_eq!(hub.registry().lookup(&a).unwrap().display_name, "User ab");
    }

    #[test]
    fn test_departure_is_broadcast_to_remaining() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub);
        let (b, mut rx_b) = connect(&hub);
        let (_c, mut rx_c) = connect(&hub);
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            drain(rx);
        }

        assert!(depart(&hub, &b));
        assert!(hub.registry().lookup(&b).is_none());
        for rx in [&mut rx_a, &mut rx_c] {
            assert_eq!(drain(rx), vec![json!({"type": "peer-disconnected", "id": b})]);
        }
        assert!(drain(&mut rx_b).is_empty());
        assert!(hub.registry().contains(&a));
    }

    #[test]
    fn test_new_peer_skips_dead_connections_and_evicts_them() {
        let hub = hub();
        let (_a, mut rx_a) = connect(&hub);
        let (dead, rx_dead) = connect(&hub);
        drain(&mut rx_a);
        drop(rx_dead);

        let (c, mut rx_c) = connect(&hub);
        assert!(hub.registry().lookup(&dead).is_none());

        let frames_a = drain(&mut rx_a);
        assert_eq!(frames_a[0], json!({"type": "new-peer", "id": c}));
        assert_eq!(frames_a[1], json!({"type": "peer-disconnected", "id": dead}));

        let frames_c = drain(&mut rx_c);
        assert_eq!(frames_c[0]["type"], "existing-peers");
        assert_eq!(frames_c.last().unwrap(), &json!({"type": "peer-disconnected", "id": dead}));
    }

    #[test]
    fn test_concurrent_joins_each_learn_of_the_other_once() {
        let hub = Arc::new(hub());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hub = hub.clone();
                std::thread::spawn(move || connect(&hub))
            })
            .collect();
        let mut peers: Vec<(String, mpsc::UnboundedReceiver<Message>)> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        for (id, rx) in peers.iter_mut() {
            let mut known: Vec<String> = Vec::new();
            for frame in drain(rx) {
                match frame["type"].as_str().unwrap() {
                    "existing-peers" => known.extend(
                        frame["peers"]
                            .as_array()
                            .unwrap()
                            .iter()
                            .map(|p| p.as_str().unwrap().to_string()),
                    ),
                    "new-peer" => known.push(frame["id"].as_str().unwrap().to_string()),
                    _ => {}
                }
            }
            known.sort();
            let before = known.len();
            known.dedup();
            assert_eq!(before, known.len(), "duplicate introduction seen by {}", id);
            assert_eq!(known.len(), 7);
            assert!(!known.contains(id));
        }
    }
}
