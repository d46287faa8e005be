//! Per-room discussion state: the append-only turn log and the derived
//! statistics the SVR pass reads.
//!
//! A context is owned by exactly one controller and mutated single-threaded;
//! [`ContextView`] snapshots are cheap (shared `Arc<Turn>`s plus counters)
//! and safe to hand to parallel scoring tasks.

use crate::error::EngineError;
use crate::ids::{AgentId, RoomId};
use crate::phase::Phase;
use crate::text;
use crate::types::{AgentSpec, RoomManifest, Speaker, Turn};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Normalized token multiset over a slice of turns.
///
/// Used by the SVR pass to compare what an agent has been saying against the
/// rest of the room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDigest {
    tokens: BTreeMap<String, u32>,
}

impl ContentDigest {
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tokens: BTreeMap<String, u32> = BTreeMap::new();
        for text_item in texts {
            for token in text::tokenize(text_item) {
                *tokens.entry(token).or_insert(0) += 1;
            }
        }
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token_set(&self) -> BTreeSet<String> {
        self.tokens.keys().cloned().collect()
    }

    /// Jaccard similarity over the distinct-token sets of two digests.
    pub fn jaccard(&self, other: &ContentDigest) -> f64 {
        text::jaccard(&self.token_set(), &other.token_set())
    }
}

/// Everything needed to append a turn; id and timestamp are assigned by the
/// context.
#[derive(Debug, Clone)]
pub struct TurnDraft {
    pub speaker: Speaker,
    pub speaker_name: String,
    pub content: String,
    pub svr_snapshot: Option<Vec<crate::svr::SvrTuple>>,
    pub decision_reason: Option<String>,
}

impl TurnDraft {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            speaker_name: "User".to_string(),
            content: content.into(),
            svr_snapshot: None,
            decision_reason: None,
        }
    }

    pub fn agent(id: AgentId, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Agent(id),
            speaker_name: name.into(),
            content: content.into(),
            svr_snapshot: None,
            decision_reason: None,
        }
    }
}

/// Append-only discussion state for one room.
#[derive(Debug)]
pub struct DiscussionContext {
    room_id: RoomId,
    room_name: String,
    participants: Arc<Vec<AgentSpec>>,
    turns: Vec<Arc<Turn>>,
    next_turn_id: u64,
    phase: Phase,
    round: u32,
    total_turns: u64,
    agent_turns: u64,
    started_at: DateTime<Utc>,
    last_user_input_at: Option<DateTime<Utc>>,
}

impl DiscussionContext {
    pub fn new(room_id: RoomId, room_name: impl Into<String>, participants: Vec<AgentSpec>) -> Self {
        Self {
            room_id,
            room_name: room_name.into(),
            participants: Arc::new(participants),
            turns: Vec::new(),
            next_turn_id: 1,
            phase: Phase::Idle,
            round: 0,
            total_turns: 0,
            agent_turns: 0,
            started_at: Utc::now(),
            last_user_input_at: None,
        }
    }

    /// Rebuild a context from persisted state. The next turn id continues
    /// after the highest recovered id and the phase starts at Idle.
    pub fn recover(manifest: &RoomManifest, turns: Vec<Turn>) -> Result<Self, EngineError> {
        let mut last_id = 0u64;
        for turn in &turns {
            if turn.turn_id <= last_id {
                return Err(EngineError::Internal(format!(
                    "non-monotonic turn id {} after {} in room {}",
                    turn.turn_id, last_id, manifest.room_id
                )));
            }
            last_id = turn.turn_id;
        }

        let agent_turns = turns.iter().filter(|t| !t.speaker.is_user()).count() as u64;
        let last_user_input_at = turns
            .iter()
            .rev()
            .find(|t| t.speaker.is_user())
            .map(|t| t.timestamp);
        let round = turns
            .iter()
            .rev()
            .take_while(|t| !t.speaker.is_user())
            .count() as u32;

        Ok(Self {
            room_id: manifest.room_id.clone(),
            room_name: manifest.room_name.clone(),
            participants: Arc::new(manifest.participants.clone()),
            total_turns: turns.len() as u64,
            agent_turns,
            next_turn_id: last_id + 1,
            turns: turns.into_iter().map(Arc::new).collect(),
            phase: Phase::Idle,
            round,
            started_at: Utc::now(),
            last_user_input_at,
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Transition the phase along the legal graph.
    pub fn set_phase(&mut self, to: Phase) -> Result<(), EngineError> {
        if !self.phase.can_transition_to(to) {
            return Err(EngineError::InvalidPhaseTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Append a turn, assigning the next id and a non-decreasing timestamp.
    ///
    /// O(1); single-threaded inside the owning controller. A user turn
    /// resets the round counter.
    pub fn append(&mut self, draft: TurnDraft) -> Arc<Turn> {
        let now = Utc::now();
        let timestamp = match self.turns.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let turn = Arc::new(Turn {
            turn_id: self.next_turn_id,
            room_id: self.room_id.clone(),
            speaker: draft.speaker,
            speaker_name: draft.speaker_name,
            content: draft.content,
            timestamp,
            svr_snapshot: draft.svr_snapshot,
            decision_reason: draft.decision_reason,
        });

        self.next_turn_id += 1;
        self.total_turns += 1;
        if turn.speaker.is_user() {
            self.round = 0;
            self.last_user_input_at = Some(turn.timestamp);
        } else {
            self.round += 1;
            self.agent_turns += 1;
        }
        self.turns.push(Arc::clone(&turn));
        turn
    }

    /// Read-only snapshot for scoring and decisions. Never mutates.
    pub fn snapshot(&self) -> ContextView {
        let elapsed = (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        ContextView {
            room_id: self.room_id.clone(),
            room_name: self.room_name.clone(),
            participants: Arc::clone(&self.participants),
            turns: self.turns.clone(),
            phase: self.phase,
            round: self.round,
            total_turns: self.total_turns,
            agent_turns: self.agent_turns,
            elapsed,
            started_at: self.started_at,
            last_user_input_at: self.last_user_input_at,
        }
    }

    pub fn participants(&self) -> &[AgentSpec] {
        &self.participants
    }

    pub fn turns(&self) -> &[Arc<Turn>] {
        &self.turns
    }

    pub fn total_turns(&self) -> u64 {
        self.total_turns
    }

    pub fn round(&self) -> u32 {
        self.round
    }
}

/// Cheap read-only view over a [`DiscussionContext`].
///
/// All derived statistics are deterministic functions of `turns`.
#[derive(Debug, Clone)]
pub struct ContextView {
    pub room_id: RoomId,
    pub room_name: String,
    pub participants: Arc<Vec<AgentSpec>>,
    pub turns: Vec<Arc<Turn>>,
    pub phase: Phase,
    pub round: u32,
    pub total_turns: u64,
    pub agent_turns: u64,
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    pub last_user_input_at: Option<DateTime<Utc>>,
}

impl ContextView {
    /// Last `k` turns, oldest first.
    pub fn recent_window(&self, k: usize) -> &[Arc<Turn>] {
        let start = self.turns.len().saturating_sub(k);
        &self.turns[start..]
    }

    pub fn last_turn_of(&self, agent: &AgentId) -> Option<&Arc<Turn>> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.speaker.agent_id() == Some(agent))
    }

    /// All turns by `agent`, oldest first.
    pub fn turns_of(&self, agent: &AgentId) -> Vec<&Arc<Turn>> {
        self.turns
            .iter()
            .filter(|t| t.speaker.agent_id() == Some(agent))
            .collect()
    }

    pub fn last_user_turn(&self) -> Option<&Arc<Turn>> {
        self.turns.iter().rev().find(|t| t.speaker.is_user())
    }

    /// Number of turns (any speaker) appended after the agent's most recent
    /// turn. None if the agent has never spoken.
    pub fn turns_since_last_spoke(&self, agent: &AgentId) -> Option<usize> {
        self.turns
            .iter()
            .rev()
            .position(|t| t.speaker.agent_id() == Some(agent))
    }

    /// Fraction of the last `window` turns spoken by each participant.
    pub fn participation(&self, window: usize) -> BTreeMap<AgentId, f64> {
        let recent = self.recent_window(window);
        let mut stats: BTreeMap<AgentId, f64> = self
            .participants
            .iter()
            .map(|a| (a.agent_id.clone(), 0.0))
            .collect();
        if recent.is_empty() {
            return stats;
        }
        let denom = recent.len() as f64;
        for turn in recent {
            if let Some(id) = turn.speaker.agent_id() {
                if let Some(share) = stats.get_mut(id) {
                    *share += 1.0 / denom;
                }
            }
        }
        stats
    }

    /// Normalized entropy of the agent-speaker distribution over the last
    /// `window` turns. Low entropy means the same voices keep talking.
    pub fn speaker_entropy(&self, window: usize) -> f64 {
        let mut counts: BTreeMap<&AgentId, usize> = BTreeMap::new();
        for turn in self.recent_window(window) {
            if let Some(id) = turn.speaker.agent_id() {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        let values: Vec<usize> = counts.values().copied().collect();
        text::normalized_entropy(&values)
    }

    /// Digest over the agent's last three turns.
    pub fn content_digest(&self, agent: &AgentId) -> ContentDigest {
        let turns = self.turns_of(agent);
        let start = turns.len().saturating_sub(3);
        ContentDigest::from_texts(turns[start..].iter().map(|t| t.content.as_str()))
    }

    /// Mean content length of the last `window` turns, in characters.
    pub fn mean_turn_length(&self, window: usize) -> f64 {
        let recent = self.recent_window(window);
        if recent.is_empty() {
            return 0.0;
        }
        let total: usize = recent.iter().map(|t| t.content.chars().count()).sum();
        total as f64 / recent.len() as f64
    }
}
