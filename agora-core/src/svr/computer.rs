//! Per-agent SVR computation.
//!
//! Pure with respect to `(state, agent, view, config)`: the engine runs each
//! computation on its own task and only commits the returned state when the
//! task beats the round deadline, so a timed-out computation never corrupts
//! an agent's score history.

use super::{SvrFailure, SvrTuple};
use crate::config::EngineConfig;
use crate::context::{ContentDigest, ContextView};
use crate::ids::AgentId;
use crate::text;
use crate::types::{AgentSpec, Turn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Score history one computer carries across rounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputerState {
    /// EWMA of realized value scores ("history performance").
    pub value_ewma: Option<f64>,
    /// Previous round's stop score, for delta-cap smoothing.
    pub last_stop: Option<f64>,
}

/// Compute one agent's SVR tuple against a context snapshot.
///
/// CPU-only; no awaits. Latency is filled in by the engine.
pub fn compute(
    agent: &AgentSpec,
    view: &ContextView,
    cfg: &EngineConfig,
    mut state: ComputerState,
) -> (SvrTuple, ComputerState) {
    let svr = &cfg.svr;
    let window = cfg.participation_window;

    let my_turns = view.turns_of(&agent.agent_id);
    let participation = view
        .participation(window)
        .get(&agent.agent_id)
        .copied()
        .unwrap_or(0.0);

    let stop_raw = stop_score(agent, view, cfg, &my_turns, participation);
    let stop = smooth_stop(stop_raw, state.last_stop, svr.stop_delta_cap);
    state.last_stop = Some(stop);

    let value = value_score(agent, view, cfg, &my_turns, &state);
    state.value_ewma = Some(match state.value_ewma {
        Some(prev) => svr.value_ewma_alpha * value + (1.0 - svr.value_ewma_alpha) * prev,
        None => value,
    });

    let repeat = repeat_score(view, cfg, &my_turns, participation);

    let tuple = SvrTuple {
        agent_id: agent.agent_id.clone(),
        stop: clip(stop),
        value: clip(value),
        repeat: clip(repeat),
        latency_ms: 0,
        error: None,
        eligible: true,
    };
    (tuple, state)
}

/// Wrap a panicking computation into an errored tuple. Scoring must never
/// take the controller down.
pub fn compute_guarded(
    agent: &AgentSpec,
    view: &ContextView,
    cfg: &EngineConfig,
    state: ComputerState,
) -> (SvrTuple, ComputerState) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        compute(agent, view, cfg, state.clone())
    }));
    match result {
        Ok(out) => out,
        Err(_) => (
            SvrTuple::errored(
                agent.agent_id.clone(),
                SvrFailure::Internal {
                    message: "svr computation panicked".to_string(),
                },
            ),
            state,
        ),
    }
}

fn clip(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn smooth_stop(raw: f64, previous: Option<f64>, cap: f64) -> f64 {
    match previous {
        None => clip(raw),
        Some(prev) => {
            let delta = (raw - prev).clamp(-cap, cap);
            clip(prev + delta)
        }
    }
}

fn stop_score(
    agent: &AgentSpec,
    view: &ContextView,
    cfg: &EngineConfig,
    my_turns: &[&Arc<Turn>],
    participation: f64,
) -> f64 {
    let svr = &cfg.svr;
    let window = cfg.participation_window;

    let consensus = consensus_contribution(agent, view, my_turns);

    let soft_cap = 6.0_f64.max(2.0 * view.participants.len() as f64);
    let saturation = (view.round as f64 / soft_cap).min(1.0);

    // Peaks at 1 once the agent holds 60% of the recent window.
    let fatigue = (participation / 0.6).min(1.0);

    let agent_turns_in_window = view
        .recent_window(window)
        .iter()
        .filter(|t| !t.speaker.is_user())
        .count();
    let global_stop = if agent_turns_in_window < 2 {
        0.0
    } else {
        1.0 - view.speaker_entropy(window)
    };

    let time_factor = if cfg.max_duration.is_zero() {
        1.0
    } else {
        (view.elapsed.as_secs_f64() / cfg.max_duration.as_secs_f64()).min(1.0)
    };

    svr.stop_consensus_weight * consensus
        + svr.stop_saturation_weight * saturation
        + svr.stop_fatigue_weight * fatigue
        + svr.stop_global_weight * global_stop
        + svr.stop_time_weight * time_factor
}

/// Mean digest similarity between this agent's last turn and the other
/// participants' last turns. Neutral 0.3 before anyone has enough history.
fn consensus_contribution(agent: &AgentSpec, view: &ContextView, my_turns: &[&Arc<Turn>]) -> f64 {
    const NEUTRAL: f64 = 0.3;
    let Some(my_last) = my_turns.last() else {
        return NEUTRAL;
    };
    let mine = ContentDigest::from_texts([my_last.content.as_str()]);

    let mut similarities = Vec::new();
    for other in view.participants.iter() {
        if other.agent_id == agent.agent_id {
            continue;
        }
        if let Some(theirs) = view.last_turn_of(&other.agent_id) {
            let digest = ContentDigest::from_texts([theirs.content.as_str()]);
            similarities.push(mine.jaccard(&digest));
        }
    }
    if similarities.is_empty() {
        return NEUTRAL;
    }
    similarities.iter().sum::<f64>() / similarities.len() as f64
}

fn value_score(
    agent: &AgentSpec,
    view: &ContextView,
    cfg: &EngineConfig,
    my_turns: &[&Arc<Turn>],
    state: &ComputerState,
) -> f64 {
    let svr = &cfg.svr;

    let quality = turn_quality(my_turns, svr.cold_start_value);
    let history = state.value_ewma.unwrap_or(svr.cold_start_value);
    let interaction = interaction_potential(view, &agent.agent_id);
    let relevance = topical_relevance(agent, view);

    svr.value_quality_weight * quality
        + svr.value_history_weight * history
        + svr.value_interaction_weight * interaction
        + svr.value_relevance_weight * relevance
}

/// Rolling quality of the agent's last turns: length in the useful band,
/// low duplication against the preceding turn, fresh tokens against its own
/// recent digest.
fn turn_quality(my_turns: &[&Arc<Turn>], cold_start: f64) -> f64 {
    if my_turns.is_empty() {
        return cold_start;
    }
    let start = my_turns.len().saturating_sub(3);
    let recent = &my_turns[start..];

    let mut scores = Vec::with_capacity(recent.len());
    for (i, turn) in recent.iter().enumerate() {
        let len = turn.content.chars().count() as f64;
        let length_score = if (40.0..=600.0).contains(&len) {
            1.0
        } else if len < 40.0 {
            len / 40.0
        } else {
            600.0 / len
        };

        let absolute_index = start + i;
        let duplication = if absolute_index == 0 {
            0.0
        } else {
            let prev = my_turns[absolute_index - 1];
            text::jaccard(&text::token_set(&turn.content), &text::token_set(&prev.content))
        };

        let earlier = ContentDigest::from_texts(
            my_turns[..absolute_index].iter().map(|t| t.content.as_str()),
        );
        let novelty = text::novelty_ratio(&turn.content, &earlier.token_set());

        scores.push(0.5 * length_score + 0.3 * (1.0 - duplication) + 0.2 * novelty);
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// 1 if the agent has not spoken in the last `|participants|` turns,
/// linearly decaying toward 0 the more recently it spoke.
fn interaction_potential(view: &ContextView, agent: &AgentId) -> f64 {
    let n = view.participants.len().max(1);
    match view.turns_since_last_spoke(agent) {
        None => 1.0,
        Some(gap) if gap >= n => 1.0,
        Some(gap) => gap as f64 / n as f64,
    }
}

/// Jaccard between the agent's role-prompt tokens and the last user turn.
fn topical_relevance(agent: &AgentSpec, view: &ContextView) -> f64 {
    const NEUTRAL: f64 = 0.5;
    let Some(user_turn) = view.last_user_turn() else {
        return NEUTRAL;
    };
    let role_text = format!("{} {}", agent.role, agent.system_prompt);
    text::jaccard(&text::token_set(&role_text), &text::token_set(&user_turn.content))
}

fn repeat_score(
    view: &ContextView,
    cfg: &EngineConfig,
    my_turns: &[&Arc<Turn>],
    participation: f64,
) -> f64 {
    // No meaningful repetition risk before the second utterance.
    if my_turns.len() < 2 {
        return 0.0;
    }
    let svr = &cfg.svr;
    let last = my_turns[my_turns.len() - 1];
    let last_tokens = text::token_set(&last.content);

    let prior_start = my_turns.len().saturating_sub(4);
    let prior = ContentDigest::from_texts(
        my_turns[prior_start..my_turns.len() - 1]
            .iter()
            .map(|t| t.content.as_str()),
    );
    let self_similarity = text::jaccard(&last_tokens, &prior.token_set());

    let pattern = text::trigram_overlap(&last.content, &my_turns[my_turns.len() - 2].content);

    let recycling = view
        .turns
        .iter()
        .filter(|t| t.turn_id < last.turn_id)
        .map(|t| text::jaccard(&last_tokens, &text::token_set(&t.content)))
        .fold(0.0_f64, f64::max);

    let frequency = if participation > 0.5 {
        0.8
    } else if participation > 0.3 {
        0.4
    } else {
        0.1
    };

    svr.repeat_self_weight * self_similarity
        + svr.repeat_pattern_weight * pattern
        + svr.repeat_recycling_weight * recycling
        + svr.repeat_frequency_weight * frequency
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DiscussionContext, TurnDraft};
    use crate::ids::RoomId;
    use crate::types::{BackendBinding, ModelParams};

    fn spec(id: &str, role: &str) -> AgentSpec {
        AgentSpec {
            agent_id: AgentId::from(id),
            display_name: id.to_uppercase(),
            role: role.to_string(),
            system_prompt: format!("You are a {role}."),
            backend: BackendBinding {
                platform: "scripted".to_string(),
                model: "test".to_string(),
            },
            model_params: ModelParams::default(),
        }
    }

    fn ctx(specs: Vec<AgentSpec>) -> DiscussionContext {
        DiscussionContext::new(RoomId::from("room"), "room", specs)
    }

    #[test]
    fn test_scores_stay_in_bounds() {
        let a = spec("a", "historian");
        let b = spec("b", "critic");
        let mut context = ctx(vec![a.clone(), b.clone()]);
        context.append(TurnDraft::user("Discuss the causes of the war"));
        for i in 0..8 {
            let (id, name) = if i % 2 == 0 { ("a", "A") } else { ("b", "B") };
            context.append(TurnDraft::agent(
                AgentId::from(id),
                name,
                format!("point number {i} about causes and alliances"),
            ));
        }

        let view = context.snapshot();
        let cfg = EngineConfig::default();
        let (tuple, _) = compute(&a, &view, &cfg, ComputerState::default());
        assert!((0.0..=1.0).contains(&tuple.stop));
        assert!((0.0..=1.0).contains(&tuple.value));
        assert!((0.0..=1.0).contains(&tuple.repeat));
        assert!(tuple.is_valid());
    }

    #[test]
    fn test_unspoken_agent_gets_cold_start_value_and_zero_repeat() {
        let a = spec("a", "historian");
        let b = spec("b", "critic");
        let mut context = ctx(vec![a, b.clone()]);
        context.append(TurnDraft::user("topic"));
        context.append(TurnDraft::agent(AgentId::from("a"), "A", "something"));

        let view = context.snapshot();
        let cfg = EngineConfig::default();
        let (tuple, _) = compute(&b, &view, &cfg, ComputerState::default());
        assert_eq!(tuple.repeat, 0.0);
        // quality and history both sit at the cold-start baseline, and the
        // agent has never spoken so interaction potential is 1.
        assert!(tuple.value > 0.6);
    }

    #[test]
    fn test_repeat_rises_for_verbatim_repetition() {
        let a = spec("a", "historian");
        let mut context = ctx(vec![a.clone()]);
        context.append(TurnDraft::user("topic"));
        let line = "the alliance system dragged every power into the conflict";
        for _ in 0..4 {
            context.append(TurnDraft::agent(AgentId::from("a"), "A", line));
        }

        let view = context.snapshot();
        let cfg = EngineConfig::default();
        let (repeated, _) = compute(&a, &view, &cfg, ComputerState::default());

        let mut fresh_ctx = ctx(vec![a.clone()]);
        fresh_ctx.append(TurnDraft::user("topic"));
        fresh_ctx.append(TurnDraft::agent(
            AgentId::from("a"),
            "A",
            "the alliance system dragged every power into the conflict",
        ));
        fresh_ctx.append(TurnDraft::agent(
            AgentId::from("a"),
            "A",
            "naval rivalry created an arms race nobody could exit",
        ));
        let (varied, _) = compute(&a, &fresh_ctx.snapshot(), &cfg, ComputerState::default());

        assert!(repeated.repeat > varied.repeat);
        assert!(repeated.repeat > 0.5);
    }

    #[test]
    fn test_stop_delta_cap_limits_movement() {
        let a = spec("a", "historian");
        let context = ctx(vec![a.clone()]);
        let view = context.snapshot();
        let cfg = EngineConfig::default();

        let state = ComputerState {
            value_ewma: None,
            last_stop: Some(0.9),
        };
        let (tuple, new_state) = compute(&a, &view, &cfg, state);
        // Raw stop for an empty room is near zero; the cap only lets it fall
        // by 0.2 per round.
        assert!((tuple.stop - 0.7).abs() < 1e-6);
        assert_eq!(new_state.last_stop, Some(tuple.stop));
    }

    #[test]
    fn test_value_ewma_accumulates() {
        let a = spec("a", "historian");
        let context = ctx(vec![a.clone()]);
        let view = context.snapshot();
        let cfg = EngineConfig::default();

        let (first, state1) = compute(&a, &view, &cfg, ComputerState::default());
        assert_eq!(state1.value_ewma, Some(first.value));
        let (_, state2) = compute(&a, &view, &cfg, state1.clone());
        assert!(state2.value_ewma.is_some());
    }

    #[test]
    fn test_determinism() {
        let a = spec("a", "historian");
        let b = spec("b", "critic");
        let mut context = ctx(vec![a.clone(), b]);
        context.append(TurnDraft::user("Discuss the treaty"));
        context.append(TurnDraft::agent(AgentId::from("a"), "A", "the treaty failed"));
        context.append(TurnDraft::agent(AgentId::from("b"), "B", "the treaty held"));

        let view = context.snapshot();
        let cfg = EngineConfig::default();
        let (x, _) = compute(&a, &view, &cfg, ComputerState::default());
        let (y, _) = compute(&a, &view, &cfg, ComputerState::default());
        assert_eq!(x.stop, y.stop);
        assert_eq!(x.value, y.value);
        assert_eq!(x.repeat, y.repeat);
    }
}
