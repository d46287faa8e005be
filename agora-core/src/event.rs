//! Discussion events for streaming output
//!
//! One tick emits, in order: `svr_computed`, `decision_made`,
//! `turn_started`, then `turn_completed` or `turn_failed`. Phase changes and
//! persistence warnings interleave as they happen. A `turn_completed` event
//! is emitted only after its turn is appended to the context.

use crate::ids::{AgentId, RoomId};
use crate::phase::Phase;
use crate::svr::SvrTuple;
use crate::svr::decider::DecisionAction;
use crate::types::Turn;
use serde::{Deserialize, Serialize};

/// Events emitted by a room controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscussionEvent {
    /// A parallel SVR pass finished.
    SvrComputed {
        room_id: RoomId,
        scores: Vec<SvrTuple>,
    },

    /// The decider chose the next action.
    DecisionMade {
        room_id: RoomId,
        action: DecisionAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        selected_agent_id: Option<AgentId>,
        reason: String,
    },

    /// A think call was issued to the selected agent.
    TurnStarted {
        room_id: RoomId,
        agent_id: AgentId,
        agent_name: String,
    },

    /// A turn landed in the log.
    TurnCompleted { room_id: RoomId, turn: Turn },

    /// The selected agent failed to produce a turn.
    TurnFailed {
        room_id: RoomId,
        agent_id: AgentId,
        reason: String,
    },

    PhaseChanged { room_id: RoomId, phase: Phase },

    /// Durability lag exceeded the configured cap.
    PersistenceDegraded { room_id: RoomId, lag: usize },
}

impl DiscussionEvent {
    /// Canonical serialized discriminator, matching the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SvrComputed { .. } => "svr_computed",
            Self::DecisionMade { .. } => "decision_made",
            Self::TurnStarted { .. } => "turn_started",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::TurnFailed { .. } => "turn_failed",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::PersistenceDegraded { .. } => "persistence_degraded",
        }
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::SvrComputed { room_id, .. }
            | Self::DecisionMade { room_id, .. }
            | Self::TurnStarted { room_id, .. }
            | Self::TurnCompleted { room_id, .. }
            | Self::TurnFailed { room_id, .. }
            | Self::PhaseChanged { room_id, .. }
            | Self::PersistenceDegraded { room_id, .. } => room_id,
        }
    }

    /// Turn id carried by this event, for sequence pinning.
    pub fn turn_id(&self) -> Option<u64> {
        match self {
            Self::TurnCompleted { turn, .. } => Some(turn.turn_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = DiscussionEvent::PhaseChanged {
            room_id: RoomId::from("r-1"),
            phase: Phase::Running,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["phase"], "running");
    }

    #[test]
    fn test_decision_event_omits_absent_agent() {
        let event = DiscussionEvent::DecisionMade {
            room_id: RoomId::from("r-1"),
            action: DecisionAction::Stop,
            selected_agent_id: None,
            reason: "consensus".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("selected_agent_id"));
    }
}
