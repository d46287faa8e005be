//! agora-store - room persistence
//!
//! A room is a directory: `manifest.json` describes it, `turns.log` holds one
//! JSON turn per line, append-only. Stores are eventually consistent with the
//! in-memory context; the runtime mirrors turns asynchronously with
//! at-least-once semantics.

pub mod fs;
pub mod memory;

pub use fs::FsRoomStore;
pub use memory::InMemoryRoomStore;

use agora_core::{RoomId, RoomManifest, Turn};
use async_trait::async_trait;

/// Errors from room stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("corrupt turn log at line {line}: {message}")]
    Corrupt { line: usize, message: String },
}

/// Durable room storage.
///
/// `append_turns` must preserve the caller's order; `load_turns` returns
/// turns in log order and tolerates a trailing partial line (a crash-time
/// torn write), but fails on corruption anywhere else.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn save_manifest(&self, manifest: &RoomManifest) -> Result<(), StoreError>;

    async fn load_manifest(&self, room_id: &RoomId) -> Result<Option<RoomManifest>, StoreError>;

    async fn append_turns(&self, room_id: &RoomId, turns: &[Turn]) -> Result<(), StoreError>;

    async fn load_turns(&self, room_id: &RoomId) -> Result<Vec<Turn>, StoreError>;

    async fn list_rooms(&self) -> Result<Vec<RoomManifest>, StoreError>;

    async fn delete_room(&self, room_id: &RoomId) -> Result<(), StoreError>;
}
