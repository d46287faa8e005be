//! WebSocket endpoint: one read loop per connection, one writer task, and
//! command dispatch into the room registry and framework manager.

use crate::hub::ConnectionId;
use crate::wire::{ClientCommand, WireFrame, error_payload};
use crate::{AppState, rooms};
use agora_core::{EngineError, RoomId};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

const OUTBOUND_BUFFER: usize = 64;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let connection_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    state.hub.register(connection_id, tx).await;
    tracing::info!(connection_id = %connection_id, "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Welcome frame; a changed restart id tells the client to drop stale
    // room state.
    state
        .hub
        .send_to(
            &connection_id,
            WireFrame::global(
                "connection",
                json!({
                    "connection_id": connection_id.to_string(),
                    "server_restart_id": state.server_restart_id,
                }),
            ),
        )
        .await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(&state, connection_id, text.as_str()).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.hub.unregister(&connection_id).await;
    writer.abort();
    tracing::info!(connection_id = %connection_id, "websocket disconnected");
}

async fn handle_text(state: &AppState, connection_id: ConnectionId, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(error) => {
            send_error(
                state,
                &connection_id,
                "BAD_REQUEST",
                &format!("unknown or malformed message: {error}"),
                None,
            )
            .await;
            return;
        }
    };
    dispatch(state, connection_id, command).await;
}

async fn dispatch(state: &AppState, connection_id: ConnectionId, command: ClientCommand) {
    match command {
        ClientCommand::CreateRoom { room_name, agents } => {
            match rooms::create_room(state, &room_name, &agents).await {
                Ok(manifest) => {
                    // The creator usually wants the stream right away.
                    state.hub.subscribe(&manifest.room_id, connection_id).await;
                    let agents: Vec<_> = manifest
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
                    reply(
                        state,
                        &connection_id,
                        "room_created",
                        Some(manifest.room_id.clone()),
                        json!({
                            "room_id": manifest.room_id,
                            "room_name": manifest.room_name,
                            "agents": agents,
                        }),
                    )
                    .await;
                }
                Err(error) => {
                    send_engine_error(state, &connection_id, &error, Some("create_room")).await;
                }
            }
        }

        ClientCommand::JoinRoom { room_id } => {
            match rooms::load_manifest(state, &room_id).await {
                Ok(_) => {
                    state.hub.subscribe(&room_id, connection_id).await;
                    reply(
                        state,
                        &connection_id,
                        "room_joined",
                        Some(room_id.clone()),
                        json!({ "room_id": room_id }),
                    )
                    .await;
                }
                Err(error) => {
                    send_engine_error(state, &connection_id, &error, Some("join_room")).await;
                }
            }
        }

        ClientCommand::SendMessage {
            room_id, content, ..
        } => {
            let result = match rooms::load_manifest(state, &room_id).await {
                Ok(_) => state.post_or_start(&room_id, content).await,
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                send_engine_error(state, &connection_id, &error, Some("send_message")).await;
            }
            // The appended turn itself arrives as `new_message` through the
            // room bridge.
        }

        ClientCommand::GetRoomHistory { room_id } => {
            let history = async {
                rooms::load_manifest(state, &room_id).await?;
                rooms::load_turns(state, &room_id).await
            }
            .await;
            match history {
                Ok(turns) => {
                    let messages: Vec<_> = turns.iter().map(rooms::history_message).collect();
                    reply(
                        state,
                        &connection_id,
                        "room_history",
                        Some(room_id.clone()),
                        json!({ "room_id": room_id, "messages": messages }),
                    )
                    .await;
                }
                Err(error) => {
                    send_engine_error(state, &connection_id, &error, Some("get_room_history"))
                        .await;
                }
            }
        }

        ClientCommand::DeleteRoom { room_id } => {
            match rooms::delete_room(state, &room_id).await {
                Ok(manifest) => {
                    let payload = json!({
                        "room_id": manifest.room_id,
                        "room_name": manifest.room_name,
                    });
                    // Everyone watching the room learns it is gone; the
                    // requester gets a direct confirmation too.
                    state
                        .hub
                        .publish(&room_id, "room_deleted", payload.clone(), None)
                        .await;
                    reply(
                        state,
                        &connection_id,
                        "room_deleted",
                        Some(room_id),
                        payload,
                    )
                    .await;
                }
                Err(error) => {
                    send_engine_error(state, &connection_id, &error, Some("delete_room")).await;
                }
            }
        }

        ClientCommand::GetRooms => match rooms::list_rooms(state).await {
            Ok(manifests) => {
                let list: Vec<_> = manifests.iter().map(rooms::room_summary).collect();
                reply(
                    state,
                    &connection_id,
                    "rooms_list",
                    None,
                    json!({ "rooms": list }),
                )
                .await;
            }
            Err(error) => {
                send_engine_error(state, &connection_id, &error, Some("get_rooms")).await;
            }
        },

        ClientCommand::DiscussionControl { room_id, action } => {
            if let Err(error) = state.manager.control(&room_id, action).await {
                send_engine_error(state, &connection_id, &error, Some("discussion_control")).await;
            }
            // Success is visible as a phase_changed event on the room.
        }
    }
}

async fn reply(
    state: &AppState,
    connection_id: &ConnectionId,
    kind: &str,
    room_id: Option<RoomId>,
    payload: serde_json::Value,
) {
    state
        .hub
        .send_to(
            connection_id,
            WireFrame {
                kind: kind.to_string(),
                room_id,
                sequence: 0,
                payload,
            },
        )
        .await;
}

async fn send_engine_error(
    state: &AppState,
    connection_id: &ConnectionId,
    error: &EngineError,
    action: Option<&str>,
) {
    send_error(
        state,
        connection_id,
        error.error_code(),
        &error.to_string(),
        action,
    )
    .await;
}

async fn send_error(
    state: &AppState,
    connection_id: &ConnectionId,
    code: &str,
    message: &str,
    action: Option<&str>,
) {
    state
        .hub
        .send_to(
            connection_id,
            WireFrame::global("error", error_payload(code, message, action)),
        )
        .await;
}
