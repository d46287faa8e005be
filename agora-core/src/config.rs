//! Engine configuration.
//!
//! One record with every tunable; loaders layer file/env values on top of
//! these defaults and the core never re-reads configuration at runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete configuration for the discussion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard budget on agent turns per room.
    pub max_turns: u64,
    /// Hard budget on wall-clock discussion time.
    pub max_duration: Duration,
    /// Bound on a single backend think call.
    pub think_timeout: Duration,
    /// Global deadline for one parallel SVR pass.
    pub svr_deadline: Duration,
    /// Per-subscriber delivery bound before the subscriber is dropped.
    pub publish_timeout: Duration,
    /// How long process shutdown waits for each controller to stop.
    pub shutdown_grace: Duration,
    /// Max turns handed to a backend as history.
    pub history_window: usize,
    /// Approximate token budget for backend history, applied when tighter
    /// than `history_window`.
    pub history_token_budget: usize,
    /// Window (in turns) for participation and entropy statistics.
    pub participation_window: usize,
    /// Durability lag (in turns) past which the controller warns.
    pub persist_lag_cap: usize,
    /// Speaker substitutions allowed within one round after think failures.
    pub substitutions_per_round: u32,
    pub svr: SvrConfig,
    pub decider: DeciderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            max_duration: Duration::from_secs(3600),
            think_timeout: Duration::from_secs(30),
            svr_deadline: Duration::from_millis(1500),
            publish_timeout: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
            history_window: 40,
            history_token_budget: 8192,
            participation_window: 10,
            persist_lag_cap: 200,
            substitutions_per_round: 2,
            svr: SvrConfig::default(),
            decider: DeciderConfig::default(),
        }
    }
}

/// Weights and smoothing for the per-agent SVR computation.
///
/// Each weight group sums to 1; the computed dimensions are clipped to
/// [0, 1] regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvrConfig {
    // stop
    pub stop_consensus_weight: f64,
    pub stop_saturation_weight: f64,
    pub stop_fatigue_weight: f64,
    pub stop_global_weight: f64,
    pub stop_time_weight: f64,
    // value
    pub value_quality_weight: f64,
    pub value_history_weight: f64,
    pub value_interaction_weight: f64,
    pub value_relevance_weight: f64,
    // repeat
    pub repeat_self_weight: f64,
    pub repeat_pattern_weight: f64,
    pub repeat_recycling_weight: f64,
    pub repeat_frequency_weight: f64,
    /// Max movement of the stop dimension per round for one agent.
    pub stop_delta_cap: f64,
    /// EWMA factor for the history-performance value signal.
    pub value_ewma_alpha: f64,
    /// Value baseline for agents that have not spoken yet.
    pub cold_start_value: f64,
}

impl Default for SvrConfig {
    fn default() -> Self {
        Self {
            stop_consensus_weight: 0.30,
            stop_saturation_weight: 0.25,
            stop_fatigue_weight: 0.15,
            stop_global_weight: 0.20,
            stop_time_weight: 0.10,
            value_quality_weight: 0.35,
            value_history_weight: 0.25,
            value_interaction_weight: 0.25,
            value_relevance_weight: 0.15,
            repeat_self_weight: 0.40,
            repeat_pattern_weight: 0.25,
            repeat_recycling_weight: 0.20,
            repeat_frequency_weight: 0.15,
            stop_delta_cap: 0.2,
            value_ewma_alpha: 0.3,
            cold_start_value: 0.75,
        }
    }
}

/// Thresholds for the decision rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeciderConfig {
    /// Mean stop score at which the room stops by consensus. The single
    /// source of truth for this threshold.
    pub stop_threshold: f64,
    /// Best value below which the room is redirected to the user.
    pub quality_floor: f64,
    /// Rounds that must elapse before consensus stop or redirect can fire.
    pub min_rounds_before_stop: u32,
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            stop_threshold: 0.80,
            quality_floor: 0.20,
            min_rounds_before_stop: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_turns, 50);
        assert_eq!(cfg.max_duration, Duration::from_secs(3600));
        assert_eq!(cfg.think_timeout, Duration::from_secs(30));
        assert_eq!(cfg.svr_deadline, Duration::from_millis(1500));
        assert_eq!(cfg.publish_timeout, Duration::from_millis(100));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(5));
        assert_eq!(cfg.decider.stop_threshold, 0.80);
        assert_eq!(cfg.decider.quality_floor, 0.20);
        assert_eq!(cfg.decider.min_rounds_before_stop, 2);
    }

    #[test]
    fn test_weight_groups_sum_to_one() {
        let svr = SvrConfig::default();
        let stop = svr.stop_consensus_weight
            + svr.stop_saturation_weight
            + svr.stop_fatigue_weight
            + svr.stop_global_weight
            + svr.stop_time_weight;
        let value = svr.value_quality_weight
            + svr.value_history_weight
            + svr.value_interaction_weight
            + svr.value_relevance_weight;
        let repeat = svr.repeat_self_weight
            + svr.repeat_pattern_weight
            + svr.repeat_recycling_weight
            + svr.repeat_frequency_weight;
        assert!((stop - 1.0).abs() < 1e-9);
        assert!((value - 1.0).abs() < 1e-9);
        assert!((repeat - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_turns, cfg.max_turns);
        assert_eq!(parsed.decider.stop_threshold, cfg.decider.stop_threshold);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: EngineConfig = serde_json::from_str(r#"{"max_turns": 5}"#).unwrap();
        assert_eq!(parsed.max_turns, 5);
        assert_eq!(parsed.history_window, 40);
    }
}
