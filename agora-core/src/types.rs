//! Core types for agora
//!
//! These types form the representation boundary for room persistence and the
//! wire format: they serialize exactly as stored in `turns.log` and as sent
//! to clients.

use crate::ids::{AgentId, RoomId};
use crate::svr::SvrTuple;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Immutable descriptor of one agent participating in a room.
///
/// Created when the room is created and never mutated afterwards; the
/// controller only ever reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_id: AgentId,
    pub display_name: String,
    /// Short role description ("critic", "historian", ...). Feeds the
    /// topical-relevance SVR signal together with the system prompt.
    pub role: String,
    pub system_prompt: String,
    pub backend: BackendBinding,
    #[serde(default)]
    pub model_params: ModelParams,
}

/// Binding of an agent to a model platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendBinding {
    /// Platform key resolved through the settings registry ("openai",
    /// "anthropic", a compatible gateway, or "scripted" in tests).
    pub platform: String,
    pub model: String,
}

/// Per-call model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: 1024,
        }
    }
}

/// Who produced a turn.
///
/// Serialized as the wire string: `"user"` for the human, otherwise the
/// agent id. Internal code matches on the enum, never on raw strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    Agent(AgentId),
}

impl Speaker {
    pub const USER_WIRE_ID: &'static str = "user";

    pub fn as_wire_id(&self) -> &str {
        match self {
            Self::User => Self::USER_WIRE_ID,
            Self::Agent(id) => id.as_str(),
        }
    }

    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Self::User => None,
            Self::Agent(id) => Some(id),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }
}

impl Serialize for Speaker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire_id())
    }
}

impl<'de> Deserialize<'de> for Speaker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(de::Error::custom("speaker id must not be empty"));
        }
        Ok(match raw.as_str() {
            Self::USER_WIRE_ID => Self::User,
            _ => Self::Agent(AgentId(raw)),
        })
    }
}

/// One immutable speech act in a room.
///
/// Turn ids strictly increase inside a room; ordering across rooms is
/// undefined. Turns are append-only and never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: u64,
    pub room_id: RoomId,
    pub speaker: Speaker,
    pub speaker_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// SVR table of the round that selected this speaker, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svr_snapshot: Option<Vec<SvrTuple>>,
    /// Reason string of the decision that caused this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
}

/// Durable description of a room, stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomManifest {
    pub room_id: RoomId,
    pub room_name: String,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<AgentSpec>,
}

impl RoomManifest {
    pub fn agent(&self, id: &AgentId) -> Option<&AgentSpec> {
        self.participants.iter().find(|a| &a.agent_id == id)
    }
}
