//! Engine errors.
//!
//! Every variant maps to one of the stable wire codes so errors crossing a
//! module boundary stay machine-readable.

use crate::ids::{AgentId, RoomId};
use crate::phase::Phase;

/// Errors surfaced by the discussion engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("room not found: {room_id}")]
    RoomNotFound { room_id: RoomId },

    #[error("invalid room: {reason}")]
    RoomInvalid { reason: String },

    #[error("discussion already active for room {room_id}")]
    AlreadyActive { room_id: RoomId },

    #[error("agent {agent_id} timed out")]
    AgentTimeout { agent_id: AgentId },

    #[error("agent {agent_id} failed permanently: {reason}")]
    AgentPermanent { agent_id: AgentId, reason: String },

    #[error("all agents failed")]
    AllAgentsFailed,

    #[error("discussion budget exceeded")]
    BudgetExceeded,

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("illegal phase transition: {from} -> {to}")]
    InvalidPhaseTransition { from: Phase, to: Phase },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable wire code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotFound { .. } => "ROOM_NOT_FOUND",
            Self::RoomInvalid { .. } => "ROOM_INVALID",
            Self::AlreadyActive { .. } => "ALREADY_ACTIVE",
            Self::AgentTimeout { .. } => "AGENT_TIMEOUT",
            Self::AgentPermanent { .. } => "AGENT_PERMANENT",
            Self::AllAgentsFailed => "ALL_AGENTS_FAILED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::InvalidPhaseTransition { .. } => "BAD_REQUEST",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            EngineError::RoomNotFound {
                room_id: RoomId::from("r")
            }
            .error_code(),
            "ROOM_NOT_FOUND"
        );
        assert_eq!(EngineError::AllAgentsFailed.error_code(), "ALL_AGENTS_FAILED");
        assert_eq!(EngineError::BudgetExceeded.error_code(), "BUDGET_EXCEEDED");
        assert_eq!(
            EngineError::bad_request("nope").error_code(),
            "BAD_REQUEST"
        );
    }

    #[test]
    fn test_display_is_human_readable() {
        let err = EngineError::AgentPermanent {
            agent_id: AgentId::from("a-1"),
            reason: "401".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("a-1"));
        assert!(!text.contains("backtrace"));
    }
}
