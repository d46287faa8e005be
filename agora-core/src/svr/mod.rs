//! SVR scoring: three bounded signals per agent, computed every round.
//!
//! `stop` is how strongly this agent's standpoint says the discussion should
//! end, `value` the expected benefit of letting it speak next, `repeat` the
//! risk it restates what the room already heard.

pub mod computer;
pub mod decider;
pub mod engine;

use crate::ids::AgentId;
use serde::{Deserialize, Serialize};

/// Why an agent's SVR computation produced no scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SvrFailure {
    /// The computation missed the round deadline.
    Timeout,
    /// The round was canceled before the computation finished.
    Canceled,
    /// The scoring task failed.
    Internal { message: String },
}

impl SvrFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Internal { .. } => "internal",
        }
    }
}

/// One agent's scores for one round.
///
/// `stop`, `value`, and `repeat` are in [0, 1] when `error` is absent.
/// `eligible` is cleared for degraded agents: their scores are still
/// computed but the decider will not select them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvrTuple {
    pub agent_id: AgentId,
    pub stop: f64,
    pub value: f64,
    pub repeat: f64,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SvrFailure>,
    #[serde(default = "default_eligible")]
    pub eligible: bool,
}

fn default_eligible() -> bool {
    true
}

impl SvrTuple {
    pub fn errored(agent_id: AgentId, failure: SvrFailure) -> Self {
        Self {
            agent_id,
            stop: 0.0,
            value: 0.0,
            repeat: 0.0,
            latency_ms: 0,
            error: Some(failure),
            eligible: true,
        }
    }

    /// Whether the scores are usable.
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Composite ranking score: favors value, penalizes repetition, and
    /// half-weights the agent's own wish to stop.
    pub fn selection_score(&self) -> f64 {
        self.value * (1.0 - self.repeat) * (1.0 - 0.5 * self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_score_shape() {
        let mut tuple = SvrTuple {
            agent_id: AgentId::from("a"),
            stop: 0.0,
            value: 1.0,
            repeat: 0.0,
            latency_ms: 1,
            error: None,
            eligible: true,
        };
        assert_eq!(tuple.selection_score(), 1.0);

        tuple.repeat = 1.0;
        assert_eq!(tuple.selection_score(), 0.0);

        tuple.repeat = 0.0;
        tuple.stop = 1.0;
        assert!((tuple.selection_score() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_errored_tuple_is_invalid_but_counted() {
        let tuple = SvrTuple::errored(AgentId::from("a"), SvrFailure::Timeout);
        assert!(!tuple.is_valid());
        assert!(tuple.eligible);
    }

    #[test]
    fn test_eligible_defaults_to_true_on_old_records() {
        let json = r#"{"agent_id":"a","stop":0.1,"value":0.5,"repeat":0.2,"latency_ms":3}"#;
        let tuple: SvrTuple = serde_json::from_str(json).unwrap();
        assert!(tuple.eligible);
        assert!(tuple.is_valid());
    }
}
