//! agora-server - WebSocket + HTTP surface for discussion rooms
//!
//! Clients attach over `/ws`, join rooms, and watch discussions in real
//! time; a REST surface under `/api` covers room CRUD, history/export,
//! settings, and discussion control.
//!
//! # Environment variables
//!
//! - `BIND_HOST`: host to bind to (default `0.0.0.0`)
//! - `BIND_PORT`: port to bind to (default `8080`)
//! - `AGORA_DATA_DIR`: room storage root (default: platform data dir)
//! - `AGORA_SETTINGS_PATH`: settings TOML path (default: data dir)

pub mod bridge;
pub mod http;
pub mod hub;
pub mod rooms;
pub mod settings;
pub mod wire;
pub mod ws;

use agora_runtime::FrameworkManager;
use axum::Router;
use axum::routing::{delete, get, post};
use hub::ClientHub;
use settings::SettingsManager;
use std::sync::Arc;
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<FrameworkManager>,
    pub hub: Arc<ClientHub>,
    pub settings: Arc<SettingsManager>,
    /// Changes on every process start; clients discard stale room state
    /// when they see a new value.
    pub server_restart_id: String,
}

impl AppState {
    pub fn new(
        manager: Arc<FrameworkManager>,
        hub: Arc<ClientHub>,
        settings: Arc<SettingsManager>,
    ) -> Self {
        Self {
            manager,
            hub,
            settings,
            server_restart_id: Uuid::new_v4().to_string(),
        }
    }

    /// Deliver a user message, starting the room's controller when idle.
    pub async fn post_or_start(
        &self,
        room_id: &agora_core::RoomId,
        content: String,
    ) -> Result<(), agora_core::EngineError> {
        if self.manager.is_active(room_id).await {
            return self.manager.post_user_message(room_id, content).await;
        }
        match self.manager.start(room_id, content.clone()).await {
            Ok(session) => {
                bridge::spawn_bridge(Arc::clone(&self.hub), session.events);
                Ok(())
            }
            // Lost a start race: the other starter owns the bridge.
            Err(agora_core::EngineError::AlreadyActive { .. }) => {
                self.manager.post_user_message(room_id, content).await
            }
            Err(other) => Err(other),
        }
    }
}

/// Build the HTTP/WS router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/rooms", get(http::list_rooms).post(http::create_room))
        .route("/api/rooms/{id}", delete(http::delete_room))
        .route("/api/rooms/{id}/history", get(http::room_history))
        .route("/api/rooms/{id}/export", get(http::export_room))
        .route("/api/rooms/{id}/agents", get(http::room_agents))
        .route(
            "/api/settings",
            get(http::get_settings).post(http::update_settings),
        )
        .route("/api/test-connection", post(http::test_connection))
        .route("/api/discussion/status/{id}", get(http::discussion_status))
        .route(
            "/api/discussion/control/{id}",
            post(http::discussion_control),
        )
        .route("/api/discussion/start", post(http::discussion_start))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
