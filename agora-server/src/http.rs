//! REST surface under `/api`.

use crate::settings::Settings;
use crate::wire::AgentDef;
use crate::{AppState, rooms};
use agora_core::{EngineError, RoomId};
use agora_runtime::ControlAction;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// HTTP-facing error with a stable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let code = error.error_code();
        let status = match code {
            "ROOM_NOT_FOUND" => StatusCode::NOT_FOUND,
            "ALREADY_ACTIVE" => StatusCode::CONFLICT,
            "ROOM_INVALID" | "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "BUDGET_EXCEEDED" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code.to_string(),
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub room_name: String,
    pub agents: Vec<AgentDef>,
}

#[derive(Debug, Deserialize)]
pub struct TestConnectionRequest {
    pub platform: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
}

#[derive(Debug, Deserialize)]
pub struct StartDiscussionRequest {
    pub room_id: RoomId,
    pub content: String,
}

pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let manifests = rooms::list_rooms(&state).await?;
    let list: Vec<Value> = manifests.iter().map(rooms::room_summary).collect();
    Ok(Json(json!({ "rooms": list })))
}

pub async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<Value>, ApiError> {
    let manifest = rooms::create_room(&state, &request.room_name, &request.agents).await?;
    Ok(Json(json!({
        "room_id": manifest.room_id,
        "room_name": manifest.room_name,
        "agent_count": manifest.participants.len(),
    })))
}

pub async fn delete_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let manifest = rooms::delete_room(&state, &RoomId::from(id)).await?;
    Ok(Json(json!({
        "room_id": manifest.room_id,
        "room_name": manifest.room_name,
    })))
}

pub async fn room_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let room_id = RoomId::from(id);
    rooms::load_manifest(&state, &room_id).await?;
    let turns = rooms::load_turns(&state, &room_id).await?;
    let messages: Vec<Value> = turns.iter().map(rooms::history_message).collect();
    Ok(Json(json!({ "room_id": room_id, "messages": messages })))
}

pub async fn export_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let room_id = RoomId::from(id);
    let manifest = rooms::load_manifest(&state, &room_id).await?;
    let turns = rooms::load_turns(&state, &room_id).await?;
    let markdown = rooms::export_markdown(&manifest, &turns);
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    )
        .into_response())
}

pub async fn room_agents(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let room_id = RoomId::from(id);
    let manifest = rooms::load_manifest(&state, &room_id).await?;
    let agents: Vec<Value> = manifest
        .participants
        .iter()
        .map(|a| {
            json!({
                "agent_id": a.agent_id,
                "name": a.display_name,
                "role": a.role,
                "platform": a.backend.platform,
                "model": a.backend.model,
            })
        })
        .collect();
    Ok(Json(json!({ "room_id": room_id, "agents": agents })))
}

pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.current().masked())
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    let merged = state.settings.update(update).await.map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "INTERNAL",
        message: e.to_string(),
    })?;
    Ok(Json(merged.masked()))
}

pub async fn test_connection(
    State(state): State<AppState>,
    Json(request): Json<TestConnectionRequest>,
) -> Json<Value> {
    let model = if request.model.is_empty() {
        state
            .settings
            .current()
            .platforms
            .get(&request.platform)
            .map(|p| p.default_model.clone())
            .unwrap_or_default()
    } else {
        request.model
    };
    match state.settings.probe(&request.platform, &model).await {
        Ok(latency) => Json(json!({
            "ok": true,
            "platform": request.platform,
            "model": model,
            "latency_ms": latency.as_millis() as u64,
        })),
        Err(error) => Json(json!({
            "ok": false,
            "platform": request.platform,
            "model": model,
            "error_code": error.error_code(),
            "message": error.to_string(),
        })),
    }
}

pub async fn discussion_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let room_id = RoomId::from(id);
    match state.manager.status(&room_id).await {
        Ok(status) => Ok(Json(serde_json::to_value(&status).unwrap_or_default())),
        Err(EngineError::RoomNotFound { .. }) => {
            // No controller; the room may still exist on disk as idle.
            rooms::load_manifest(&state, &room_id).await?;
            let turns = rooms::load_turns(&state, &room_id).await?;
            Ok(Json(json!({
                "room_id": room_id,
                "phase": "idle",
                "total_turns": turns.len(),
                "round": 0,
                "degraded_agents": [],
            })))
        }
        Err(other) => Err(other.into()),
    }
}

pub async fn discussion_control(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<Value>, ApiError> {
    let room_id = RoomId::from(id);
    state.manager.control(&room_id, request.action).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn discussion_start(
    State(state): State<AppState>,
    Json(request): Json<StartDiscussionRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.content.trim().is_empty() {
        return Err(EngineError::bad_request("content must not be empty").into());
    }
    rooms::load_manifest(&state, &request.room_id).await?;
    state
        .post_or_start(&request.room_id, request.content)
        .await?;
    Ok(Json(json!({ "ok": true, "room_id": request.room_id })))
}
