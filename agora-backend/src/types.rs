//! The think contract between the controller and model backends.

use crate::error::ThinkError;
use agora_core::ModelParams;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Role of one history message as seen by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One bounded-history message handed to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Input of one think call.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinkRequest {
    pub model: String,
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub params: ModelParams,
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Output of one think call.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinkReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// An opaque text-production capability.
///
/// Implementations are pure functions of their inputs plus remote state.
/// They honor the cancellation handle immediately, bound their own network
/// timeouts, and may retry transient I/O internally (at most twice, see
/// [`crate::retry::RetryPolicy`]).
#[async_trait]
pub trait AgentBackend: std::fmt::Debug + Send + Sync {
    /// Produce a reply for the given prompt and history.
    ///
    /// An empty reply is reported as [`ThinkError::Transient`], never as a
    /// success, so the controller can substitute another speaker.
    async fn think(
        &self,
        request: ThinkRequest,
        cancel: &CancellationToken,
    ) -> Result<ThinkReply, ThinkError>;

    /// Provider tag for logging and the connection tester.
    fn platform(&self) -> &'static str;

    /// Cheap reachability probe used by the connection tester.
    ///
    /// `model` is the model the caller intends to use; providers that can
    /// only probe per-model must exercise exactly that model so the result
    /// reflects the configured pair, not some other model the key happens
    /// to reach.
    async fn health_check(&self, model: &str) -> Result<(), ThinkError>;
}

/// Reject empty replies uniformly across providers.
pub(crate) fn non_empty_reply(text: String, usage: TokenUsage) -> Result<ThinkReply, ThinkError> {
    if text.trim().is_empty() {
        return Err(ThinkError::Transient {
            message: "backend returned an empty reply".to_string(),
        });
    }
    Ok(ThinkReply { text, usage })
}
