//! agora-core - Core discussion engine for agora (no I/O deps beyond tokio)
//!
//! This crate contains the types, context bookkeeping, and the SVR
//! (stop / value / repeat) scoring and decision machinery that drive a
//! deliberative multi-agent discussion. It is intentionally free of network
//! and storage dependencies so the engine can be tested in-process.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod ids;
pub mod phase;
pub mod svr;
pub mod text;
pub mod types;

pub use config::{DeciderConfig, EngineConfig, SvrConfig};
pub use context::{ContentDigest, ContextView, DiscussionContext, TurnDraft};
pub use error::EngineError;
pub use event::DiscussionEvent;
pub use ids::{AgentId, RoomId, SessionId};
pub use phase::Phase;
pub use svr::decider::{Decision, DecisionAction, DecisionReason, decide, ranked_candidates};
pub use svr::engine::ParallelSvrEngine;
pub use svr::{SvrFailure, SvrTuple};
pub use types::{AgentSpec, BackendBinding, ModelParams, RoomManifest, Speaker, Turn};
