//! Decision rules mapping an SVR table to the next discussion action.
//!
//! `decide` is a pure function of its inputs: same scores and view produce
//! the same decision. Rules are evaluated first-match:
//!
//! 1. hard budget stop (agent turns or elapsed time)
//! 2. consensus stop (mean stop over valid tuples)
//! 3. quality floor (redirect to the user)
//! 4. continue with the best-ranked eligible agent
//! 5. pause when nothing is selectable

use super::SvrTuple;
use crate::config::EngineConfig;
use crate::context::ContextView;
use crate::ids::AgentId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// What the room does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Continue,
    Stop,
    Pause,
    RedirectToUser,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::RedirectToUser => "redirect_to_user",
        }
    }
}

/// Why the action was chosen. Rendered as a stable reason string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    Budget,
    Consensus,
    LowValue,
    TopScore,
    AllAgentsFailed,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Consensus => "consensus",
            Self::LowValue => "low-value",
            Self::TopScore => "top-score",
            Self::AllAgentsFailed => "all-agents-failed",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one decision round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_agent_id: Option<AgentId>,
    pub reason: DecisionReason,
    pub raw_scores: Vec<SvrTuple>,
}

/// Apply the decision rules to one round's scores.
pub fn decide(scores: &[SvrTuple], view: &ContextView, cfg: &EngineConfig) -> Decision {
    // Rule 1: hard budget.
    if view.agent_turns >= cfg.max_turns || view.elapsed >= cfg.max_duration {
        return Decision {
            action: DecisionAction::Stop,
            selected_agent_id: None,
            reason: DecisionReason::Budget,
            raw_scores: scores.to_vec(),
        };
    }

    let valid: Vec<&SvrTuple> = scores.iter().filter(|t| t.is_valid()).collect();
    let past_min_rounds = view.round >= cfg.decider.min_rounds_before_stop;

    // Rule 2: consensus stop.
    if !valid.is_empty() && past_min_rounds {
        let mean_stop = valid.iter().map(|t| t.stop).sum::<f64>() / valid.len() as f64;
        if mean_stop >= cfg.decider.stop_threshold {
            return Decision {
                action: DecisionAction::Stop,
                selected_agent_id: None,
                reason: DecisionReason::Consensus,
                raw_scores: scores.to_vec(),
            };
        }
    }

    // Rule 3: quality floor.
    if !valid.is_empty() && past_min_rounds {
        let best_value = valid.iter().map(|t| t.value).fold(f64::MIN, f64::max);
        if best_value < cfg.decider.quality_floor {
            return Decision {
                action: DecisionAction::RedirectToUser,
                selected_agent_id: None,
                reason: DecisionReason::LowValue,
                raw_scores: scores.to_vec(),
            };
        }
    }

    // Rule 4: continue with the top-ranked selectable agent.
    let ranked = ranked_candidates(scores, view, cfg.participation_window);
    if let Some(best) = ranked.first() {
        return Decision {
            action: DecisionAction::Continue,
            selected_agent_id: Some(best.clone()),
            reason: DecisionReason::TopScore,
            raw_scores: scores.to_vec(),
        };
    }

    // Rule 5: nothing selectable (every tuple errored or ineligible).
    Decision {
        action: DecisionAction::Pause,
        selected_agent_id: None,
        reason: DecisionReason::AllAgentsFailed,
        raw_scores: scores.to_vec(),
    }
}

/// Selectable agents ordered best-first by selection score, breaking ties by
/// lowest recent participation and then by agent id.
///
/// The controller walks this list when substituting after think failures.
pub fn ranked_candidates(scores: &[SvrTuple], view: &ContextView, window: usize) -> Vec<AgentId> {
    let participation: BTreeMap<AgentId, f64> = view.participation(window);
    let mut selectable: Vec<&SvrTuple> = scores
        .iter()
        .filter(|t| t.is_valid() && t.eligible)
        .collect();

    selectable.sort_by(|a, b| {
        b.selection_score()
            .partial_cmp(&a.selection_score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let pa = participation.get(&a.agent_id).copied().unwrap_or(0.0);
                let pb = participation.get(&b.agent_id).copied().unwrap_or(0.0);
                pa.partial_cmp(&pb).unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });

    selectable.into_iter().map(|t| t.agent_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DiscussionContext, TurnDraft};
    use crate::ids::RoomId;
    use crate::svr::SvrFailure;
    use crate::types::{AgentSpec, BackendBinding, ModelParams};
    use std::time::Duration;

    fn spec(id: &str) -> AgentSpec {
        AgentSpec {
            agent_id: AgentId::from(id),
            display_name: id.to_uppercase(),
            role: "debater".to_string(),
            system_prompt: "You debate.".to_string(),
            backend: BackendBinding {
                platform: "scripted".to_string(),
                model: "test".to_string(),
            },
            model_params: ModelParams::default(),
        }
    }

    fn tuple(id: &str, stop: f64, value: f64, repeat: f64) -> SvrTuple {
        SvrTuple {
            agent_id: AgentId::from(id),
            stop,
            value,
            repeat,
            latency_ms: 1,
            error: None,
            eligible: true,
        }
    }

    fn view_with_rounds(agents: &[&str], agent_turns: usize) -> ContextView {
        let mut ctx = DiscussionContext::new(
            RoomId::from("room"),
            "room",
            agents.iter().map(|a| spec(a)).collect(),
        );
        ctx.append(TurnDraft::user("topic"));
        for i in 0..agent_turns {
            let id = agents[i % agents.len()];
            ctx.append(TurnDraft::agent(
                AgentId::from(id),
                id.to_uppercase(),
                format!("statement {i}"),
            ));
        }
        ctx.snapshot()
    }

    #[test]
    fn test_hard_stop_on_turn_budget() {
        let view = view_with_rounds(&["a"], 3);
        let cfg = EngineConfig {
            max_turns: 3,
            ..Default::default()
        };
        let decision = decide(&[tuple("a", 0.0, 1.0, 0.0)], &view, &cfg);
        assert_eq!(decision.action, DecisionAction::Stop);
        assert_eq!(decision.reason, DecisionReason::Budget);
    }

    #[test]
    fn test_zero_turn_budget_stops_before_anything() {
        let view = view_with_rounds(&["a"], 0);
        let cfg = EngineConfig {
            max_turns: 0,
            ..Default::default()
        };
        let decision = decide(&[tuple("a", 0.0, 1.0, 0.0)], &view, &cfg);
        assert_eq!(decision.action, DecisionAction::Stop);
        assert_eq!(decision.reason, DecisionReason::Budget);
    }

    #[test]
    fn test_hard_stop_on_duration() {
        let view = view_with_rounds(&["a"], 1);
        let cfg = EngineConfig {
            max_duration: Duration::ZERO,
            ..Default::default()
        };
        let decision = decide(&[tuple("a", 0.0, 1.0, 0.0)], &view, &cfg);
        assert_eq!(decision.reason, DecisionReason::Budget);
    }

    #[test]
    fn test_consensus_stop_requires_min_rounds() {
        let cfg = EngineConfig::default();
        let scores = vec![tuple("a", 0.9, 0.5, 0.1), tuple("b", 0.85, 0.5, 0.1)];

        // Round 1: too early, keeps going.
        let early = view_with_rounds(&["a", "b"], 1);
        assert_eq!(decide(&scores, &early, &cfg).action, DecisionAction::Continue);

        // Round 4: mean stop 0.875 >= 0.80 stops by consensus.
        let late = view_with_rounds(&["a", "b"], 4);
        let decision = decide(&scores, &late, &cfg);
        assert_eq!(decision.action, DecisionAction::Stop);
        assert_eq!(decision.reason, DecisionReason::Consensus);
    }

    #[test]
    fn test_quality_floor_redirects() {
        let cfg = EngineConfig::default();
        let scores = vec![tuple("a", 0.1, 0.1, 0.1), tuple("b", 0.1, 0.15, 0.1)];
        let view = view_with_rounds(&["a", "b"], 4);
        let decision = decide(&scores, &view, &cfg);
        assert_eq!(decision.action, DecisionAction::RedirectToUser);
        assert_eq!(decision.reason, DecisionReason::LowValue);
    }

    #[test]
    fn test_continue_picks_highest_score() {
        let cfg = EngineConfig::default();
        let scores = vec![
            tuple("a", 0.1, 0.9, 0.1),
            tuple("b", 0.1, 0.6, 0.1),
            tuple("c", 0.1, 0.4, 0.1),
        ];
        let view = view_with_rounds(&["a", "b", "c"], 3);
        let decision = decide(&scores, &view, &cfg);
        assert_eq!(decision.action, DecisionAction::Continue);
        assert_eq!(decision.selected_agent_id, Some(AgentId::from("a")));
        assert_eq!(decision.reason, DecisionReason::TopScore);
    }

    #[test]
    fn test_tie_breaks_on_participation_then_id() {
        let cfg = EngineConfig::default();
        let scores = vec![tuple("a", 0.2, 0.5, 0.1), tuple("b", 0.2, 0.5, 0.1)];

        // a spoke three times recently, b never: b wins the tie.
        let mut ctx = DiscussionContext::new(
            RoomId::from("room"),
            "room",
            vec![spec("a"), spec("b")],
        );
        ctx.append(TurnDraft::user("topic"));
        for _ in 0..3 {
            ctx.append(TurnDraft::agent(AgentId::from("a"), "A", "again"));
        }
        let decision = decide(&scores, &ctx.snapshot(), &cfg);
        assert_eq!(decision.selected_agent_id, Some(AgentId::from("b")));

        // With identical participation, the lower id wins.
        let even = view_with_rounds(&["a", "b"], 0);
        let decision = decide(&scores, &even, &cfg);
        assert_eq!(decision.selected_agent_id, Some(AgentId::from("a")));
    }

    #[test]
    fn test_errored_tuples_excluded_but_round_survives() {
        let cfg = EngineConfig::default();
        let scores = vec![
            SvrTuple::errored(AgentId::from("a"), SvrFailure::Timeout),
            tuple("b", 0.1, 0.5, 0.1),
        ];
        let view = view_with_rounds(&["a", "b"], 2);
        let decision = decide(&scores, &view, &cfg);
        assert_eq!(decision.action, DecisionAction::Continue);
        assert_eq!(decision.selected_agent_id, Some(AgentId::from("b")));
    }

    #[test]
    fn test_all_errored_pauses() {
        let cfg = EngineConfig::default();
        let scores = vec![
            SvrTuple::errored(AgentId::from("a"), SvrFailure::Timeout),
            SvrTuple::errored(AgentId::from("b"), SvrFailure::Timeout),
        ];
        let view = view_with_rounds(&["a", "b"], 2);
        let decision = decide(&scores, &view, &cfg);
        assert_eq!(decision.action, DecisionAction::Pause);
        assert_eq!(decision.reason, DecisionReason::AllAgentsFailed);
    }

    #[test]
    fn test_ineligible_agents_skipped() {
        let cfg = EngineConfig::default();
        let mut degraded = tuple("a", 0.1, 0.9, 0.0);
        degraded.eligible = false;
        let scores = vec![degraded, tuple("b", 0.1, 0.3, 0.1)];
        let view = view_with_rounds(&["a", "b"], 2);
        let decision = decide(&scores, &view, &cfg);
        assert_eq!(decision.selected_agent_id, Some(AgentId::from("b")));
    }

    #[test]
    fn test_decide_is_deterministic() {
        let cfg = EngineConfig::default();
        let scores = vec![tuple("a", 0.3, 0.7, 0.2), tuple("b", 0.2, 0.7, 0.2)];
        let view = view_with_rounds(&["a", "b"], 2);
        let first = decide(&scores, &view, &cfg);
        let second = decide(&scores, &view, &cfg);
        assert_eq!(first, second);
    }
}
