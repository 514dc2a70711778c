//! JSON envelope kinds exchanged over the hub WebSocket.
//!
//! Every frame is a JSON object with a kebab-case `type` discriminator.
//! Inbound frames decode into [`ClientEvent`], outbound frames are encoded
//! from [`ServerEvent`]. Anything that does not decode is dropped by the
//! caller and the connection stays open.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::HubError;
use crate::poll::state::PollSnapshot;
use crate::ws::ConnectionId;

/// Vote counts keyed by option index. Only options that received a vote appear.
pub type VoteTally = BTreeMap<usize, u64>;

/// Envelopes a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    UserInfo {
        user_id: String,
        #[serde(default)]
        is_staff: bool,
        #[serde(default)]
        user_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantUpdated { participant_name: String },
    Offer(SignalRequest),
    Answer(SignalRequest),
    IceCandidate(SignalRequest),
    ChatMessage {
        message: String,
        /// Accepted for compatibility; the server always stamps its own time.
        #[serde(default)]
        timestamp: Option<String>,
    },
    PollCreated { poll: PollDefinition },
    #[serde(rename_all = "camelCase")]
    PollVote { poll_id: String, option_index: usize },
    #[serde(rename_all = "camelCase")]
    PollEnded {
        #[serde(default)]
        poll_id: Option<String>,
    },
}

/// Point-to-point negotiation payload as sent by a client.
///
/// Older clients put the SDP or candidate next to `to` instead of under
/// `payload`; those fields land in `extra` and are forwarded as they are.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignalRequest {
    pub to: ConnectionId,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Point-to-point negotiation payload as delivered to its target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRelay {
    pub from: ConnectionId,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignalRelay {
    /// Stamp `from` on a client request. A client-supplied `from` is discarded.
    pub fn from_request(from: &str, req: SignalRequest) -> Self {
        let mut extra = req.extra;
        extra.remove("from");
        Self {
            from: from.to_string(),
            payload: req.payload,
            extra,
        }
    }
}

/// Poll definition carried by `poll-created`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub question: String,
    pub options: Vec<String>,
    #[serde(default, alias = "correctOptionIndex")]
    pub correct_answer: Option<usize>,
}

/// Envelopes the server sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    ExistingPeers {
        peers: Vec<ConnectionId>,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantId {
        participant_id: ConnectionId,
    },
    NewPeer {
        id: ConnectionId,
    },
    /// Join notice of the legacy poll channel.
    #[serde(rename_all = "camelCase")]
    ParticipantJoined {
        participant_id: ConnectionId,
        participant_name: String,
    },
    PeerDisconnected {
        id: ConnectionId,
    },
    Offer(SignalRelay),
    Answer(SignalRelay),
    IceCandidate(SignalRelay),
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        sender: ConnectionId,
        sender_name: String,
        message: String,
        timestamp: String,
    },
    PollCreated {
        poll: PollSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    PollVote {
        poll_id: String,
        option_index: usize,
        sender: ConnectionId,
        results: VoteTally,
        total_votes: u64,
    },
    #[serde(rename_all = "camelCase")]
    AttendanceMarked {
        poll_id: String,
        participant_id: ConnectionId,
        participant_name: String,
        option_index: usize,
        correct: bool,
        results: VoteTally,
        total_votes: u64,
    },
    #[serde(rename_all = "camelCase")]
    PollEnded {
        poll_id: String,
        final_results: VoteTally,
        total_votes: u64,
        attendance: Vec<ConnectionId>,
    },
}

impl ServerEvent {
    /// The `type` tag, used for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::ExistingPeers { .. } => "existing-peers",
            ServerEvent::ParticipantId { .. } => "participant-id",
            ServerEvent::NewPeer { .. } => "new-peer",
            ServerEvent::ParticipantJoined { .. } => "participant-joined",
            ServerEvent::PeerDisconnected { .. } => "peer-disconnected",
            ServerEvent::Offer(_) => "offer",
            ServerEvent::Answer(_) => "answer",
            ServerEvent::IceCandidate(_) => "ice-candidate",
            ServerEvent::ChatMessage { .. } => "chat-message",
            ServerEvent::PollCreated { .. } => "poll-created",
            ServerEvent::PollVote { .. } => "poll-vote",
            ServerEvent::AttendanceMarked { .. } => "attendance-marked",
            ServerEvent::PollEnded { .. } => "poll-ended",
        }
    }
}

/// Decode a text frame into a client envelope.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, HubError> {
    serde_json::from_str(text).map_err(|e| HubError::MalformedEnvelope(e.to_string()))
}

/// Encode a server envelope as a text WebSocket frame.
pub fn encode_server_event(event: &ServerEvent) -> Result<Message, HubError> {
    let json = serde_json::to_string(event)?;
    Ok(Message::Text(json.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_to_value(event: &ServerEvent) -> Value {
        match encode_server_event(event).unwrap() {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_user_info() {
        let event =
            decode_client_event(r#"{"type":"user-info","userId":"s1234567","isStaff":true}"#)
                .unwrap();
        assert_eq!(
            event,
            ClientEvent::UserInfo {
                user_id: "s1234567".to_string(),
                is_staff: true,
                user_name: None,
            }
        );
    }

    #[test]
    fn test_decode_ice_candidate_keeps_payload_verbatim() {
        let event = decode_client_event(
            r#"{"type":"ice-candidate","to":"peer-b","payload":{"candidate":"a=1","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::IceCandidate(req) => {
                assert_eq!(req.to, "peer-b");
                assert_eq!(req.payload, json!({"candidate": "a=1", "sdpMLineIndex": 0}));
            }
            other => panic!("expected ice-candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_poll_created_accepts_either_correct_field() {
        let a = decode_client_event(
            r#"{"type":"poll-created","poll":{"question":"Q","options":["A","B"],"correctAnswer":1}}"#,
        )
        .unwrap();
        let b = decode_client_event(
            r#"{"type":"poll-created","poll":{"question":"Q","options":["A","B"],"correctOptionIndex":1}}"#,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let result = decode_client_event(r#"{"type":"screen-share","to":"x"}"#);
        assert!(matches!(result, Err(HubError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_negative_option_index() {
        let result = decode_client_event(r#"{"type":"poll-vote","pollId":"p","optionIndex":-1}"#);
        assert!(matches!(result, Err(HubError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(decode_client_event("hello").is_err());
    }

    #[test]
    fn test_encode_uses_kebab_case_tag_and_camel_case_fields() {
        let value = encode_to_value(&ServerEvent::ParticipantId {
            participant_id: "abc".to_string(),
        });
        assert_eq!(value, json!({"type": "participant-id", "participantId": "abc"}));
    }

    #[test]
    fn test_encode_relay_carries_from_not_to() {
        let value = encode_to_value(&ServerEvent::Offer(SignalRelay {
            from: "peer-a".to_string(),
            payload: json!({"sdp": "v=0"}),
            extra: Map::new(),
        }));
        assert_eq!(value, json!({"type": "offer", "from": "peer-a", "payload": {"sdp": "v=0"}}));
    }

    #[test]
    fn test_top_level_signal_fields_are_forwarded() {
        let event = decode_client_event(
            r#"{"type":"answer","to":"peer-b","from":"forged","sdp":{"type":"answer","sdp":"v=0"}}"#,
        )
        .unwrap();
        let req = match event {
            ClientEvent::Answer(req) => req,
            other => panic!("expected answer, got {:?}", other),
        };
        assert_eq!(req.payload, Value::Null);

        let value = encode_to_value(&ServerEvent::Answer(SignalRelay::from_request("peer-a", req)));
        assert_eq!(
            value,
            json!({"type": "answer", "from": "peer-a", "sdp": {"type": "answer", "sdp": "v=0"}})
        );
    }

    #[test]
    fn test_encode_tally_keys_as_strings() {
        let mut results = VoteTally::new();
        results.insert(0, 2);
        results.insert(3, 1);
        let value = encode_to_value(&ServerEvent::PollEnded {
            poll_id: "p1".to_string(),
            final_results: results,
            total_votes: 3,
            attendance: vec!["c1".to_string()],
        });
        assert_eq!(value["finalResults"], json!({"0": 2, "3": 1}));
        assert_eq!(value["totalVotes"], 3);
        assert_eq!(value["type"], "poll-ended");
    }
}
