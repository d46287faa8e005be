//! Bridge from a controller's event stream into the client hub.
//!
//! One task per session consumes the controller's outbound queue and
//! publishes wire frames; the controller never holds subscribers
//! (one-way ownership).

use crate::hub::ClientHub;
use agora_core::{DiscussionEvent, Speaker};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spawn the bridge task for one started session.
pub fn spawn_bridge(
    hub: Arc<ClientHub>,
    mut events: mpsc::Receiver<DiscussionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let room_id = event.room_id().clone();
            let turn_id = event.turn_id();
            let (kind, payload) = frame_parts(event);
            hub.publish(&room_id, kind, payload, turn_id).await;
        }
    })
}

/// Map a controller event to its wire kind and payload.
pub fn frame_parts(event: DiscussionEvent) -> (&'static str, Value) {
    match event {
        DiscussionEvent::TurnCompleted { turn, .. } => {
            let agent_name = match &turn.speaker {
                Speaker::Agent(_) => Some(turn.speaker_name.clone()),
                Speaker::User => None,
            };
            let mut payload = json!({
                "message_id": turn.turn_id.to_string(),
                "message": {
                    "sender": turn.speaker.as_wire_id(),
                    "content": turn.content,
                    "timestamp": turn.timestamp.to_rfc3339(),
                    "message_type": "text",
                },
            });
            if let Some(name) = agent_name {
                payload["agent_name"] = Value::String(name);
            }
            ("new_message", payload)
        }
        DiscussionEvent::SvrComputed { scores, .. } => (
            "svr_computed",
            json!({
                "scores": scores,
            }),
        ),
        DiscussionEvent::DecisionMade {
            action,
            selected_agent_id,
            reason,
            ..
        } => {
            let mut payload = json!({
                "action": action.as_str(),
                "reason": reason,
            });
            if let Some(agent_id) = selected_agent_id {
                payload["selected_agent_id"] = Value::String(agent_id.to_string());
            }
            ("decision_made", payload)
        }
        DiscussionEvent::TurnStarted {
            agent_id,
            agent_name,
            ..
        } => (
            "turn_started",
            json!({
                "agent_id": agent_id,
                "agent_name": agent_name,
            }),
        ),
        DiscussionEvent::TurnFailed {
            agent_id, reason, ..
        } => (
            "turn_failed",
            json!({
                "agent_id": agent_id,
                "reason": reason,
            }),
        ),
        DiscussionEvent::PhaseChanged { phase, .. } => (
            "phase_changed",
            json!({
                "phase": phase.as_str(),
            }),
        ),
        DiscussionEvent::PersistenceDegraded { lag, .. } => (
            "persistence_degraded",
            json!({
                "lag": lag,
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{AgentId, DecisionAction, Phase, RoomId, Turn};
    use chrono::Utc;

    fn agent_turn() -> Turn {
        Turn {
            turn_id: 9,
            room_id: RoomId::from("r-1"),
            speaker: Speaker::Agent(AgentId::from("a-1")),
            speaker_name: "Historian".to_string(),
            content: "a point".to_string(),
            timestamp: Utc::now(),
            svr_snapshot: None,
            decision_reason: Some("top-score".to_string()),
        }
    }

    #[test]
    fn test_turn_completed_becomes_new_message() {
        let (kind, payload) = frame_parts(DiscussionEvent::TurnCompleted {
            room_id: RoomId::from("r-1"),
            turn: agent_turn(),
        });
        assert_eq!(kind, "new_message");
        assert_eq!(payload["message_id"], "9");
        assert_eq!(payload["agent_name"], "Historian");
        assert_eq!(payload["message"]["sender"], "a-1");
        assert_eq!(payload["message"]["message_type"], "text");
    }

    #[test]
    fn test_user_turn_has_no_agent_name() {
        let mut turn = agent_turn();
        turn.speaker = Speaker::User;
        turn.speaker_name = "User".to_string();
        let (_, payload) = frame_parts(DiscussionEvent::TurnCompleted {
            room_id: RoomId::from("r-1"),
            turn,
        });
        assert!(payload.get("agent_name").is_none());
        assert_eq!(payload["message"]["sender"], "user");
    }

    #[test]
    fn test_phase_and_decision_frames() {
        let (kind, payload) = frame_parts(DiscussionEvent::PhaseChanged {
            room_id: RoomId::from("r-1"),
            phase: Phase::Paused,
        });
        assert_eq!(kind, "phase_changed");
        assert_eq!(payload["phase"], "paused");

        let (kind, payload) = frame_parts(DiscussionEvent::DecisionMade {
            room_id: RoomId::from("r-1"),
            action: DecisionAction::Continue,
            selected_agent_id: Some(AgentId::from("a-1")),
            reason: "top-score".to_string(),
        });
        assert_eq!(kind, "decision_made");
        assert_eq!(payload["action"], "continue");
        assert_eq!(payload["selected_agent_id"], "a-1");
    }
}
