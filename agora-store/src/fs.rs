//! Filesystem room store: one directory per room.
//!
//! `manifest.json` is written atomically (temp file + rename). `turns.log`
//! only ever grows; each append is flushed so a crash loses at most the
//! turn being written, which readers then skip as a trailing partial line.

use crate::{RoomStore, StoreError};
use agora_core::{RoomId, RoomManifest, Turn};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const MANIFEST_FILE: &str = "manifest.json";
const TURNS_FILE: &str = "turns.log";

/// Directory-per-room store.
pub struct FsRoomStore {
    root: PathBuf,
}

impl FsRoomStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the storage root exists.
    pub async fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn room_dir(&self, id: &RoomId) -> PathBuf {
        // Room ids are generated UUIDs; refuse anything path-like that may
        // have come in over the wire.
        let safe: String = id
            .as_str()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.root.join(safe)
    }

    fn manifest_path(&self, id: &RoomId) -> PathBuf {
        self.room_dir(id).join(MANIFEST_FILE)
    }

    fn turns_path(&self, id: &RoomId) -> PathBuf {
        self.room_dir(id).join(TURNS_FILE)
    }

    async fn read_manifest_file(path: &Path) -> Result<Option<RoomManifest>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(contents) => {
                let manifest = serde_json::from_str(&contents)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(manifest))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RoomStore for FsRoomStore {
    async fn save_manifest(&self, manifest: &RoomManifest) -> Result<(), StoreError> {
        let dir = self.room_dir(&manifest.room_id);
        fs::create_dir_all(&dir).await?;

        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Write atomically (write to temp, then rename).
        let path = self.manifest_path(&manifest.room_id);
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn load_manifest(&self, room_id: &RoomId) -> Result<Option<RoomManifest>, StoreError> {
        Self::read_manifest_file(&self.manifest_path(room_id)).await
    }

    async fn append_turns(&self, room_id: &RoomId, turns: &[Turn]) -> Result<(), StoreError> {
        if turns.is_empty() {
            return Ok(());
        }
        let dir = self.room_dir(room_id);
        fs::create_dir_all(&dir).await?;

        let mut buffer = String::new();
        for turn in turns {
            let line = serde_json::to_string(turn)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.turns_path(room_id))
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_turns(&self, room_id: &RoomId) -> Result<Vec<Turn>, StoreError> {
        let contents = match fs::read_to_string(self.turns_path(room_id)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = contents.lines().collect();
        let mut turns = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Turn>(line) {
                Ok(turn) => turns.push(turn),
                Err(_) if index == lines.len() - 1 => {
                    // Trailing partial line from a crash-time torn write.
                    tracing::warn!(
                        room_id = %room_id,
                        line = index + 1,
                        "skipping partial trailing line in turn log"
                    );
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        line: index + 1,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(turns)
    }

    async fn list_rooms(&self) -> Result<Vec<RoomManifest>, StoreError> {
        self.init().await?;
        let mut entries = fs::read_dir(&self.root).await?;
        let mut manifests = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST_FILE);
            if let Some(manifest) = Self::read_manifest_file(&manifest_path).await? {
                manifests.push(manifest);
            }
        }
        // Newest first.
        manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(manifests)
    }

    async fn delete_room(&self, room_id: &RoomId) -> Result<(), StoreError> {
        let dir = self.room_dir(room_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
