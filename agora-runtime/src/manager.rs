//! Process-wide registry of room controllers.
//!
//! Guarantees the single-writer invariant: at most one non-Stopped
//! controller per room at any instant. Cross-room operations never touch
//! controller-owned state; the registry map is the only shared structure.

use crate::controller::{ContinuousController, ControllerHandle, ControllerParams, ControllerStatus};
use crate::persist::spawn_persistor;
use agora_backend::BackendResolver;
use agora_core::{
    AgentId, DiscussionContext, DiscussionEvent, EngineConfig, EngineError, RoomId, SessionId,
};
use agora_store::RoomStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Control verbs accepted for a live discussion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
}

/// A freshly started session: its id plus the event stream to bridge.
#[derive(Debug)]
pub struct StartedSession {
    pub session_id: SessionId,
    pub events: mpsc::Receiver<DiscussionEvent>,
}

/// Registry `room -> controller`.
pub struct FrameworkManager {
    config: EngineConfig,
    store: Arc<dyn RoomStore>,
    resolver: Arc<dyn BackendResolver>,
    rooms: RwLock<HashMap<RoomId, Arc<ControllerHandle>>>,
}

impl FrameworkManager {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RoomStore>,
        resolver: Arc<dyn BackendResolver>,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a session for `room_id` seeded with `initial_input`.
    ///
    /// Recovers persisted turns first, so a restarted process continues turn
    /// ids where the log left off. Fails with `ALREADY_ACTIVE` when a live
    /// controller exists.
    pub async fn start(
        &self,
        room_id: &RoomId,
        initial_input: String,
    ) -> Result<StartedSession, EngineError> {
        let mut rooms = self.rooms.write().await;
        if let Some(existing) = rooms.get(room_id) {
            if existing.is_live() {
                return Err(EngineError::AlreadyActive {
                    room_id: room_id.clone(),
                });
            }
            rooms.remove(room_id);
        }

        let manifest = self
            .store
            .load_manifest(room_id)
            .await
            .map_err(|e| EngineError::internal(e.to_string()))?
            .ok_or_else(|| EngineError::RoomNotFound {
                room_id: room_id.clone(),
            })?;
        if manifest.participants.is_empty() {
            return Err(EngineError::RoomInvalid {
                reason: "room has no agents".to_string(),
            });
        }

        let turns = self
            .store
            .load_turns(room_id)
            .await
            .map_err(|e| EngineError::internal(e.to_string()))?;
        let context = DiscussionContext::recover(&manifest, turns)?;

        let mut backends = HashMap::new();
        for spec in &manifest.participants {
            match self.resolver.resolve(&spec.backend) {
                Ok(backend) => {
                    backends.insert(spec.agent_id.clone(), backend);
                }
                Err(error) => {
                    tracing::warn!(
                        room_id = %room_id,
                        agent_id = %spec.agent_id,
                        platform = %spec.backend.platform,
                        %error,
                        "backend resolution failed; agent will be unavailable"
                    );
                }
            }
        }
        if backends.is_empty() {
            return Err(EngineError::RoomInvalid {
                reason: "no agent backend could be resolved".to_string(),
            });
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (persistor, _persist_join) = spawn_persistor(room_id.clone(), Arc::clone(&self.store));
        let session_id = SessionId::new();

        let handle = ContinuousController::spawn(ControllerParams {
            session_id,
            context,
            backends,
            config: self.config.clone(),
            events: events_tx,
            persistor,
            initial_input: Some(initial_input),
        });
        rooms.insert(room_id.clone(), Arc::new(handle));

        Ok(StartedSession {
            session_id,
            events: events_rx,
        })
    }

    /// Whether a live controller exists for the room.
    pub async fn is_active(&self, room_id: &RoomId) -> bool {
        self.live_handle(room_id).await.is_some()
    }

    /// Deliver a user message into a live discussion.
    pub async fn post_user_message(
        &self,
        room_id: &RoomId,
        content: String,
    ) -> Result<(), EngineError> {
        let handle = self
            .live_handle(room_id)
            .await
            .ok_or_else(|| EngineError::RoomNotFound {
                room_id: room_id.clone(),
            })?;
        handle.post_user_message(content).await
    }

    /// Apply a control verb to a live discussion.
    pub async fn control(&self, room_id: &RoomId, action: ControlAction) -> Result<(), EngineError> {
        let handle = self
            .live_handle(room_id)
            .await
            .ok_or_else(|| EngineError::RoomNotFound {
                room_id: room_id.clone(),
            })?;
        match action {
            ControlAction::Pause => handle.pause().await,
            ControlAction::Resume => handle.resume().await,
            ControlAction::Stop => handle.stop().await,
        }
    }

    /// Status of one room's controller.
    pub async fn status(&self, room_id: &RoomId) -> Result<ControllerStatus, EngineError> {
        let handle = {
            let rooms = self.rooms.read().await;
            rooms.get(room_id).cloned()
        };
        match handle {
            Some(handle) => Ok(handle.status().await),
            None => Err(EngineError::RoomNotFound {
                room_id: room_id.clone(),
            }),
        }
    }

    /// Status of every registered controller.
    pub async fn all_status(&self) -> Vec<ControllerStatus> {
        let handles: Vec<Arc<ControllerHandle>> =
            self.rooms.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(handle.status().await);
        }
        statuses
    }

    /// Stop and forget a room's controller if one is live (room deletion).
    pub async fn retire_room(&self, room_id: &RoomId) {
        let handle = {
            let mut rooms = self.rooms.write().await;
            rooms.remove(room_id)
        };
        if let Some(handle) = handle {
            if handle.is_live() {
                let _ = handle.stop().await;
                handle.wait_stopped(self.config.shutdown_grace).await;
            }
        }
    }

    /// Degraded agents of a live controller, if any.
    pub async fn degraded_agents(&self, room_id: &RoomId) -> Vec<AgentId> {
        match self.status(room_id).await {
            Ok(status) => status.degraded_agents,
            Err(_) => Vec::new(),
        }
    }

    /// Cancel every controller in parallel and wait up to the grace period
    /// for each to reach Stopped.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<ControllerHandle>> = {
            let mut rooms = self.rooms.write().await;
            rooms.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.cancel();
        }
        let grace = self.config.shutdown_grace;
        let waits = handles.iter().map(|handle| handle.wait_stopped(grace));
        for finished in futures::future::join_all(waits).await {
            if !finished {
                tracing::warn!("a controller did not stop within the grace period");
            }
        }
    }

    async fn live_handle(&self, room_id: &RoomId) -> Option<Arc<ControllerHandle>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).filter(|h| h.is_live()).cloned()
    }
}
