//! agora-backend - agent backend adapters
//!
//! The engine treats an agent's model as an opaque capability: given a system
//! prompt and bounded history, return text. This crate owns that contract
//! ([`AgentBackend`]), the error taxonomy the controller reacts to, bounded
//! internal retries, and the provider clients.

pub mod anthropic;
pub mod error;
pub mod factory;
pub mod http;
pub mod openai;
pub mod retry;
pub mod scripted;
pub mod types;

pub use anthropic::AnthropicBackend;
pub use error::ThinkError;
pub use factory::{BackendFactory, BackendResolver, PlatformConfig};
pub use openai::OpenAiCompatBackend;
pub use retry::RetryPolicy;
pub use scripted::{ScriptedBackend, ScriptedOutcome};
pub use types::{AgentBackend, ChatMessage, ChatRole, ThinkReply, ThinkRequest, TokenUsage};
