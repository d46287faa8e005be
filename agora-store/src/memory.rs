//! In-memory room store for tests and ephemeral deployments.

use crate::{RoomStore, StoreError};
use agora_core::{RoomId, RoomManifest, Turn};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct RoomRecord {
    manifest: Option<RoomManifest>,
    turns: Vec<Turn>,
}

/// Volatile [`RoomStore`].
#[derive(Default)]
pub struct InMemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, RoomRecord>>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of turns recorded for a room. Test helper.
    pub async fn turn_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|r| r.turns.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn save_manifest(&self, manifest: &RoomManifest) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(manifest.room_id.clone())
            .or_default()
            .manifest = Some(manifest.clone());
        Ok(())
    }

    async fn load_manifest(&self, room_id: &RoomId) -> Result<Option<RoomManifest>, StoreError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room_id)
            .and_then(|r| r.manifest.clone()))
    }

    async fn append_turns(&self, room_id: &RoomId, turns: &[Turn]) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.clone())
            .or_default()
            .turns
            .extend_from_slice(turns);
        Ok(())
    }

    async fn load_turns(&self, room_id: &RoomId) -> Result<Vec<Turn>, StoreError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room_id)
            .map(|r| r.turns.clone())
            .unwrap_or_default())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomManifest>, StoreError> {
        let rooms = self.rooms.read().await;
        let mut manifests: Vec<RoomManifest> =
            rooms.values().filter_map(|r| r.manifest.clone()).collect();
        manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(manifests)
    }

    async fn delete_room(&self, room_id: &RoomId) -> Result<(), StoreError> {
        self.rooms.write().await.remove(room_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::Speaker;
    use chrono::Utc;

    fn turn(id: u64) -> Turn {
        Turn {
            turn_id: id,
            room_id: RoomId::from("r-1"),
            speaker: Speaker::User,
            speaker_name: "User".to_string(),
            content: "hi".to_string(),
            timestamp: Utc::now(),
            svr_snapshot: None,
            decision_reason: None,
        }
    }

    #[tokio::test]
    async fn test_append_load_delete() {
        let store = InMemoryRoomStore::new();
        let room = RoomId::from("r-1");

        store.append_turns(&room, &[turn(1), turn(2)]).await.unwrap();
        assert_eq!(store.turn_count(&room).await, 2);
        assert_eq!(store.load_turns(&room).await.unwrap().len(), 2);

        store.delete_room(&room).await.unwrap();
        assert!(store.load_turns(&room).await.unwrap().is_empty());
    }
}
