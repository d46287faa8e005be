//! Client wire protocol.
//!
//! Inbound JSON is parsed into [`ClientCommand`] at the boundary; internal
//! code never branches on raw type strings. Outbound traffic rides the
//! [`WireFrame`] envelope `{type, room_id?, sequence, payload}` where the
//! sequence is monotonic per room and equals the turn id for turn events.

use agora_core::RoomId;
use agora_runtime::ControlAction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent description supplied by clients when creating a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDef {
    pub name: String,
    pub role: String,
    pub prompt: String,
    pub model: String,
    pub platform: String,
}

/// Everything a client can send over the socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    CreateRoom {
        room_name: String,
        agents: Vec<AgentDef>,
    },
    JoinRoom {
        room_id: RoomId,
    },
    SendMessage {
        room_id: RoomId,
        content: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    GetRoomHistory {
        room_id: RoomId,
    },
    DeleteRoom {
        room_id: RoomId,
    },
    GetRooms,
    DiscussionControl {
        room_id: RoomId,
        action: ControlAction,
    },
}

/// Outbound envelope.
#[derive(Debug, Clone, Serialize)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub sequence: u64,
    pub payload: Value,
}

impl WireFrame {
    /// Frame without room affinity (connection-scoped messages).
    pub fn global(kind: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            room_id: None,
            sequence: 0,
            payload,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"type\":\"error\",\"sequence\":0,\"payload\":{\"error_code\":\"INTERNAL\",\"message\":\"frame serialization failed\"}}"
                .to_string()
        })
    }
}

/// Payload for `error` frames.
pub fn error_payload(error_code: &str, message: &str, action: Option<&str>) -> Value {
    let mut payload = serde_json::json!({
        "error_code": error_code,
        "message": message,
    });
    if let Some(action) = action {
        payload["action"] = Value::String(action.to_string());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_message() {
        let json = r#"{"type":"send_message","room_id":"r-1","content":"hello"}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::SendMessage {
                room_id: RoomId::from("r-1"),
                content: "hello".to_string(),
                message_id: None,
            }
        );
    }

    #[test]
    fn test_parse_create_room() {
        let json = r#"{
            "type": "create_room",
            "room_name": "debate",
            "agents": [
                {"name": "A", "role": "critic", "prompt": "p", "model": "m", "platform": "openai"}
            ]
        }"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        match cmd {
            ClientCommand::CreateRoom { room_name, agents } => {
                assert_eq!(room_name, "debate");
                assert_eq!(agents.len(), 1);
                assert_eq!(agents[0].platform, "openai");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_control_actions() {
        for action in ["pause", "resume", "stop"] {
            let json =
                format!(r#"{{"type":"discussion_control","room_id":"r","action":"{action}"}}"#);
            let cmd: ClientCommand = serde_json::from_str(&json).unwrap();
            assert!(matches!(cmd, ClientCommand::DiscussionControl { .. }));
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = r#"{"type":"make_coffee"}"#;
        assert!(serde_json::from_str::<ClientCommand>(json).is_err());
    }

    #[test]
    fn test_frame_shape() {
        let frame = WireFrame {
            kind: "new_message".to_string(),
            room_id: Some(RoomId::from("r-1")),
            sequence: 7,
            payload: serde_json::json!({"message_id": "7"}),
        };
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "new_message");
        assert_eq!(value["room_id"], "r-1");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["payload"]["message_id"], "7");
    }

    #[test]
    fn test_global_frame_omits_room() {
        let frame = WireFrame::global("connection", serde_json::json!({"connection_id": "c"}));
        let json = frame.to_json();
        assert!(!json.contains("room_id"));
    }

    #[test]
    fn test_error_payload_action_optional() {
        let payload = error_payload("ROOM_NOT_FOUND", "no such room", Some("join_room"));
        assert_eq!(payload["action"], "join_room");
        let payload = error_payload("BAD_REQUEST", "nope", None);
        assert!(payload.get("action").is_none());
    }
}
