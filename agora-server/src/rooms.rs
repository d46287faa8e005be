//! Room registry operations shared by the WebSocket and HTTP surfaces.

use crate::AppState;
use crate::wire::AgentDef;
use agora_core::{
    AgentId, AgentSpec, BackendBinding, EngineError, ModelParams, RoomId, RoomManifest, Speaker,
    Turn,
};
use chrono::Utc;
use serde_json::{Value, json};

/// Validate a creation request and persist the manifest.
pub async fn create_room(
    state: &AppState,
    room_name: &str,
    agents: &[AgentDef],
) -> Result<RoomManifest, EngineError> {
    if room_name.trim().is_empty() {
        return Err(EngineError::RoomInvalid {
            reason: "room name must not be empty".to_string(),
        });
    }
    if agents.is_empty() {
        return Err(EngineError::RoomInvalid {
            reason: "a room needs at least one agent".to_string(),
        });
    }

    let settings = state.settings.current();
    let mut participants = Vec::with_capacity(agents.len());
    for def in agents {
        if def.name.trim().is_empty() {
            return Err(EngineError::RoomInvalid {
                reason: "agent names must not be empty".to_string(),
            });
        }
        let platform = if def.platform.is_empty() {
            settings.default_platform.clone()
        } else {
            def.platform.clone()
        };
        let model = if def.model.is_empty() {
            settings
                .platforms
                .get(&platform)
                .map(|p| p.default_model.clone())
                .unwrap_or_default()
        } else {
            def.model.clone()
        };
        participants.push(AgentSpec {
            agent_id: AgentId::generate(),
            display_name: def.name.clone(),
            role: def.role.clone(),
            system_prompt: def.prompt.clone(),
            backend: BackendBinding { platform, model },
            model_params: ModelParams::default(),
        });
    }

    let manifest = RoomManifest {
        room_id: RoomId::generate(),
        room_name: room_name.to_string(),
        created_at: Utc::now(),
        participants,
    };
    state
        .manager
        .store()
        .save_manifest(&manifest)
        .await
        .map_err(|e| EngineError::internal(e.to_string()))?;

    tracing::info!(
        room_id = %manifest.room_id,
        room_name = %manifest.room_name,
        agents = manifest.participants.len(),
        "room created"
    );
    Ok(manifest)
}

pub async fn load_manifest(state: &AppState, room_id: &RoomId) -> Result<RoomManifest, EngineError> {
    state
        .manager
        .store()
        .load_manifest(room_id)
        .await
        .map_err(|e| EngineError::internal(e.to_string()))?
        .ok_or_else(|| EngineError::RoomNotFound {
            room_id: room_id.clone(),
        })
}

pub async fn list_rooms(state: &AppState) -> Result<Vec<RoomManifest>, EngineError> {
    state
        .manager
        .store()
        .list_rooms()
        .await
        .map_err(|e| EngineError::internal(e.to_string()))
}

pub async fn load_turns(state: &AppState, room_id: &RoomId) -> Result<Vec<Turn>, EngineError> {
    state
        .manager
        .store()
        .load_turns(room_id)
        .await
        .map_err(|e| EngineError::internal(e.to_string()))
}

/// Stop the controller (if live) and remove the room from disk.
pub async fn delete_room(state: &AppState, room_id: &RoomId) -> Result<RoomManifest, EngineError> {
    let manifest = load_manifest(state, room_id).await?;
    state.manager.retire_room(room_id).await;
    state
        .manager
        .store()
        .delete_room(room_id)
        .await
        .map_err(|e| EngineError::internal(e.to_string()))?;
    tracing::info!(room_id = %room_id, "room deleted");
    Ok(manifest)
}

/// Wire summary of one room, used by `rooms_list` and `GET /api/rooms`.
pub fn room_summary(manifest: &RoomManifest) -> Value {
    json!({
        "room_id": manifest.room_id,
        "room_name": manifest.room_name,
        "created_at": manifest.created_at.to_rfc3339(),
        "agent_count": manifest.participants.len(),
    })
}

/// Wire rendering of one persisted turn, shaped like `new_message`.
pub fn history_message(turn: &Turn) -> Value {
    let mut message = json!({
        "message_id": turn.turn_id.to_string(),
        "message": {
            "sender": turn.speaker.as_wire_id(),
            "content": turn.content,
            "timestamp": turn.timestamp.to_rfc3339(),
            "message_type": "text",
        },
    });
    if matches!(turn.speaker, Speaker::Agent(_)) {
        message["agent_name"] = Value::String(turn.speaker_name.clone());
    }
    message
}

/// Markdown export of the whole transcript.
pub fn export_markdown(manifest: &RoomManifest, turns: &[Turn]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", manifest.room_name));
    out.push_str(&format!(
        "Created: {}\n\nParticipants:\n",
        manifest.created_at.to_rfc3339()
    ));
    for agent in &manifest.participants {
        out.push_str(&format!("- {} ({})\n", agent.display_name, agent.role));
    }
    out.push_str("\n## Transcript\n\n");
    for turn in turns {
        out.push_str(&format!(
            "**{}** · {}\n\n{}\n\n",
            turn.speaker_name,
            turn.timestamp.to_rfc3339(),
            turn.content
        ));
    }
    out
}
