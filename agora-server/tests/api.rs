//! HTTP surface tests: room CRUD, a full scripted discussion driven through
//! the API, history/export readback, and error codes.

use agora_core::EngineConfig;
use agora_runtime::FrameworkManager;
use agora_server::hub::ClientHub;
use agora_server::settings::SettingsManager;
use agora_server::{AppState, router};
use agora_store::InMemoryRoomStore;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_app(max_turns: u64) -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        max_turns,
        ..Default::default()
    };
    let settings = Arc::new(SettingsManager::new(
        dir.path().join("settings.toml"),
        config.think_timeout,
    ));
    let manager = Arc::new(FrameworkManager::new(
        config.clone(),
        Arc::new(InMemoryRoomStore::new()),
        settings.resolver(),
    ));
    let hub = Arc::new(ClientHub::new(config.publish_timeout));
    let state = AppState::new(manager, hub, settings);
    (router(state), dir)
}

async fn request_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, value)
}

fn create_room_body() -> Value {
    json!({
        "room_name": "treaty debate",
        "agents": [
            {"name": "Hawk", "role": "critic", "prompt": "You push back.", "model": "m1", "platform": "scripted"},
            {"name": "Dove", "role": "mediator", "prompt": "You reconcile.", "model": "m2", "platform": "scripted"}
        ]
    })
}

#[tokio::test]
async fn full_discussion_over_the_api() {
    let (app, _dir) = test_app(3);

    // Create a room.
    let (status, created) =
        request_json(&app, "POST", "/api/rooms", Some(create_room_body())).await;
    assert_eq!(status, StatusCode::OK);
    let room_id = created["room_id"].as_str().unwrap().to_string();
    assert_eq!(created["agent_count"], 2);

    // It shows up in the listing.
    let (status, listing) = request_json(&app, "GET", "/api/rooms", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["rooms"].as_array().unwrap().len(), 1);

    // Idle status before any input.
    let (status, idle) = request_json(
        &app,
        "GET",
        &format!("/api/discussion/status/{room_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(idle["phase"], "idle");

    // Kick off the discussion.
    let (status, started) = request_json(
        &app,
        "POST",
        "/api/discussion/start",
        Some(json!({"room_id": room_id, "content": "Is the treaty worth it?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["ok"], true);

    // Wait for the budget stop (three agent turns).
    let mut phase = String::new();
    for _ in 0..100 {
        let (_, status_body) = request_json(
            &app,
            "GET",
            &format!("/api/discussion/status/{room_id}"),
            None,
        )
        .await;
        phase = status_body["phase"].as_str().unwrap_or_default().to_string();
        if phase == "stopped" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(phase, "stopped");

    // History holds the user turn plus three agent turns, in id order.
    let (status, history) = request_json(
        &app,
        "GET",
        &format!("/api/rooms/{room_id}/history"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["message"]["sender"], "user");

    // Export is markdown with the topic in it.
    let (status, export) = request_json(
        &app,
        "GET",
        &format!("/api/rooms/{room_id}/export"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = export.as_str().unwrap();
    assert!(text.starts_with("# treaty debate"));
    assert!(text.contains("Is the treaty worth it?"));

    // Delete the room; history is gone afterwards.
    let (status, _) =
        request_json(&app, "DELETE", &format!("/api/rooms/{room_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request_json(
        &app,
        "GET",
        &format!("/api/rooms/{room_id}/history"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn room_creation_validation() {
    let (app, _dir) = test_app(3);

    let (status, body) = request_json(
        &app,
        "POST",
        "/api/rooms",
        Some(json!({"room_name": "empty", "agents": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ROOM_INVALID");

    let (status, body) = request_json(
        &app,
        "POST",
        "/api/rooms",
        Some(json!({"room_name": "   ", "agents": [{"name": "A", "role": "r", "prompt": "p", "model": "m", "platform": "scripted"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ROOM_INVALID");
}

#[tokio::test]
async fn control_on_missing_room_is_not_found() {
    let (app, _dir) = test_app(3);
    let (status, body) = request_json(
        &app,
        "POST",
        "/api/discussion/control/ghost",
        Some(json!({"action": "pause"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ROOM_NOT_FOUND");
}

#[tokio::test]
async fn agents_endpoint_lists_bindings() {
    let (app, _dir) = test_app(3);
    let (_, created) = request_json(&app, "POST", "/api/rooms", Some(create_room_body())).await;
    let room_id = created["room_id"].as_str().unwrap();

    let (status, agents) = request_json(
        &app,
        "GET",
        &format!("/api/rooms/{room_id}/agents"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let list = agents["agents"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["platform"], "scripted");
}

#[tokio::test]
async fn settings_roundtrip_masks_keys() {
    let (app, _dir) = test_app(3);

    let (status, settings) = request_json(&app, "GET", "/api/settings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["platforms"]["openai"]["api_key"], "");

    let mut update = settings.clone();
    update["platforms"]["openai"]["api_key"] = json!("sk-very-secret");
    let (status, saved) = request_json(&app, "POST", "/api/settings", Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    // The reply masks the stored key instead of echoing it.
    assert_eq!(saved["platforms"]["openai"]["api_key"], "********");
}

#[tokio::test]
async fn second_start_reports_already_active_or_posts() {
    let (app, _dir) = test_app(50);
    let (_, created) = request_json(&app, "POST", "/api/rooms", Some(create_room_body())).await;
    let room_id = created["room_id"].as_str().unwrap().to_string();

    let (status, _) = request_json(
        &app,
        "POST",
        "/api/discussion/start",
        Some(json!({"room_id": room_id, "content": "first"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A second start while active degrades to posting a user message (or,
    // if the first session already ran out of budget, starts the next one);
    // either way the caller never sees ALREADY_ACTIVE.
    let (status, body) = request_json(
        &app,
        "POST",
        "/api/discussion/start",
        Some(json!({"room_id": room_id, "content": "second"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}
