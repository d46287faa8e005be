//! Parallel SVR engine: fans the per-agent computation out across tasks
//! under one round deadline.
//!
//! The result always contains exactly one tuple per participant, in
//! participant order. Agents whose computation misses the deadline yield a
//! `Timeout` tuple; their score history is left untouched for the next
//! round.

use super::computer::{self, ComputerState};
use super::{SvrFailure, SvrTuple};
use crate::config::EngineConfig;
use crate::context::ContextView;
use crate::ids::AgentId;
use std::collections::HashMap;
use tokio::time::Instant;

/// Engine owning per-agent score histories for one room.
#[derive(Debug, Default)]
pub struct ParallelSvrEngine {
    states: HashMap<AgentId, ComputerState>,
}

impl ParallelSvrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score every participant in parallel.
    ///
    /// Bounded by `cfg.svr_deadline`; never blocks the caller beyond the
    /// deadline plus scheduling noise.
    pub async fn compute(&mut self, view: &ContextView, cfg: &EngineConfig) -> Vec<SvrTuple> {
        let deadline = Instant::now() + cfg.svr_deadline;

        let mut handles = Vec::with_capacity(view.participants.len());
        for agent in view.participants.iter() {
            let agent = agent.clone();
            let state = self
                .states
                .get(&agent.agent_id)
                .cloned()
                .unwrap_or_default();
            let task_view = view.clone();
            let task_cfg = cfg.clone();
            let agent_id = agent.agent_id.clone();

            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let (mut tuple, new_state) =
                    computer::compute_guarded(&agent, &task_view, &task_cfg, state);
                tuple.latency_ms = started.elapsed().as_millis() as u64;
                (tuple, new_state)
            });
            handles.push((agent_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (agent_id, handle) in handles {
            let abort = handle.abort_handle();
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok((tuple, new_state))) => {
                    if tuple.is_valid() {
                        self.states.insert(agent_id, new_state);
                    }
                    results.push(tuple);
                }
                Ok(Err(join_error)) => {
                    tracing::warn!(agent_id = %agent_id, error = %join_error, "svr task failed");
                    results.push(SvrTuple::errored(
                        agent_id,
                        SvrFailure::Internal {
                            message: join_error.to_string(),
                        },
                    ));
                }
                Err(_) => {
                    abort.abort();
                    tracing::warn!(agent_id = %agent_id, "svr computation missed deadline");
                    results.push(SvrTuple::errored(agent_id, SvrFailure::Timeout));
                }
            }
        }
        results
    }

    /// Drop the score history of one agent (used when a room is re-seeded).
    pub fn forget(&mut self, agent_id: &AgentId) {
        self.states.remove(agent_id);
    }
}
