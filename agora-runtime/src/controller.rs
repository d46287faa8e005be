//! Per-room continuous discussion controller.
//!
//! One tokio task owns all mutable room state, so everything inside a room
//! is single-writer: SVR passes, decisions, appends, and emits happen in
//! program order and turns leave the room totally ordered. Control commands
//! arrive over an mpsc channel and are also consumed mid-think, so pause
//! and stop stay responsive while a backend call is in flight; a reply that
//! lands during a stop is still appended (at most one extra turn).

use crate::persist::PersistorHandle;
use crate::prompt;
use agora_backend::{AgentBackend, ThinkError, ThinkReply, ThinkRequest};
use agora_core::{
    AgentId, ContextView, Decision, DecisionAction, DecisionReason, DiscussionContext,
    DiscussionEvent, EngineConfig, EngineError, ParallelSvrEngine, Phase, RoomId, SessionId,
    Speaker, SvrTuple, Turn, TurnDraft, decide, ranked_candidates,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const PERMANENT_STRIKES_TO_DEGRADE: u32 = 2;

/// Commands a controller accepts while live.
pub enum ControllerCommand {
    UserMessage {
        content: String,
        reply_tx: oneshot::Sender<Result<(), EngineError>>,
    },
    Pause {
        reply_tx: oneshot::Sender<Result<(), EngineError>>,
    },
    Resume {
        reply_tx: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply_tx: oneshot::Sender<Result<(), EngineError>>,
    },
    Status {
        reply_tx: oneshot::Sender<ControllerStatus>,
    },
}

/// Point-in-time controller state, served over the command channel.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub room_id: RoomId,
    pub session_id: SessionId,
    pub phase: Phase,
    pub total_turns: u64,
    pub round: u32,
    pub degraded_agents: Vec<AgentId>,
}

/// Why the controller is parked in Paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseOrigin {
    /// Explicit pause command; only resume/stop leave it.
    Command,
    /// Redirect-to-user decision; the next user message resumes the loop.
    Redirect,
    /// Every candidate speaker failed; awaiting intervention.
    Failure,
}

/// Everything needed to launch a controller.
pub struct ControllerParams {
    pub session_id: SessionId,
    pub context: DiscussionContext,
    pub backends: HashMap<AgentId, Arc<dyn AgentBackend>>,
    pub config: EngineConfig,
    pub events: mpsc::Sender<DiscussionEvent>,
    pub persistor: PersistorHandle,
    /// The user turn that started this session, appended first.
    pub initial_input: Option<String>,
}

/// Handle for one live controller, shared behind an `Arc` by the registry.
///
/// Phase reads are lock-free; mutations travel over the command channel to
/// the single owning task.
pub struct ControllerHandle {
    room_id: RoomId,
    session_id: SessionId,
    command_tx: mpsc::Sender<ControllerCommand>,
    phase: Arc<AtomicU8>,
    cancel: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ControllerHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current phase (lock-free read).
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Whether the controller still accepts commands.
    pub fn is_live(&self) -> bool {
        !self.phase().is_terminal()
    }

    pub async fn post_user_message(&self, content: String) -> Result<(), EngineError> {
        self.send(|reply_tx| ControllerCommand::UserMessage { content, reply_tx })
            .await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.send(|reply_tx| ControllerCommand::Pause { reply_tx }).await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.send(|reply_tx| ControllerCommand::Resume { reply_tx }).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(|reply_tx| ControllerCommand::Stop { reply_tx }).await
    }

    pub async fn status(&self) -> ControllerStatus {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .command_tx
            .send(ControllerCommand::Status { reply_tx })
            .await
            .is_ok();
        if sent && let Ok(status) = reply_rx.await {
            return status;
        }
        // Task already gone: synthesize from the lock-free mirror.
        ControllerStatus {
            room_id: self.room_id.clone(),
            session_id: self.session_id,
            phase: self.phase(),
            total_turns: 0,
            round: 0,
            degraded_agents: Vec::new(),
        }
    }

    /// Cancel all in-flight work; the controller drains and stops.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait up to `grace` for the controller task to finish.
    pub async fn wait_stopped(&self, grace: Duration) -> bool {
        let handle = self.join.lock().await.take();
        match handle {
            Some(join) => tokio::time::timeout(grace, join).await.is_ok(),
            None => true,
        }
    }

    async fn send<F>(&self, make: F) -> Result<(), EngineError>
    where
        F: FnOnce(oneshot::Sender<Result<(), EngineError>>) -> ControllerCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::bad_request("discussion is no longer active"))?;
        reply_rx
            .await
            .map_err(|_| EngineError::bad_request("discussion is no longer active"))?
    }
}

/// The per-room turn loop.
pub struct ContinuousController {
    session_id: SessionId,
    ctx: DiscussionContext,
    cfg: EngineConfig,
    engine: ParallelSvrEngine,
    backends: HashMap<AgentId, Arc<dyn AgentBackend>>,
    command_rx: mpsc::Receiver<ControllerCommand>,
    events_tx: mpsc::Sender<DiscussionEvent>,
    persistor: PersistorHandle,
    cancel: CancellationToken,
    phase_cell: Arc<AtomicU8>,
    degraded: HashSet<AgentId>,
    permanent_strikes: HashMap<AgentId, u32>,
    queued_user: Vec<String>,
    pause_origin: Option<PauseOrigin>,
    stop_requested: bool,
    pause_requested: bool,
    persist_warned: bool,
}

enum ThinkWait {
    Done(Result<ThinkReply, ThinkError>),
    Command(Option<ControllerCommand>),
}

impl ContinuousController {
    /// Launch the controller task and return its handle.
    pub fn spawn(params: ControllerParams) -> ControllerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let phase_cell = Arc::new(AtomicU8::new(params.context.phase() as u8));
        let room_id = params.context.room_id().clone();
        let session_id = params.session_id;

        let controller = Self {
            session_id,
            ctx: params.context,
            cfg: params.config,
            engine: ParallelSvrEngine::new(),
            backends: params.backends,
            command_rx,
            events_tx: params.events,
            persistor: params.persistor,
            cancel: cancel.clone(),
            phase_cell: Arc::clone(&phase_cell),
            degraded: HashSet::new(),
            permanent_strikes: HashMap::new(),
            queued_user: Vec::new(),
            pause_origin: None,
            stop_requested: false,
            pause_requested: false,
            persist_warned: false,
        };

        let join = tokio::spawn(controller.run(params.initial_input));
        ControllerHandle {
            room_id,
            session_id,
            command_tx,
            phase: phase_cell,
            cancel,
            join: Mutex::new(Some(join)),
        }
    }

    async fn run(mut self, initial_input: Option<String>) {
        tracing::info!(
            room_id = %self.ctx.room_id(),
            session_id = %self.session_id,
            participants = self.ctx.participants().len(),
            "discussion session starting"
        );

        if let Err(error) = self.transition(Phase::Running).await {
            tracing::error!(%error, "controller could not enter Running");
            return;
        }
        if let Some(content) = initial_input {
            self.append_user_turn(content).await;
        }

        loop {
            match self.ctx.phase() {
                Phase::Running => {
                    self.drain_pending_commands();
                    self.flush_queued_user().await;
                    if self.cancel.is_cancelled() || self.stop_requested {
                        self.force_stopping().await;
                        continue;
                    }
                    if self.pause_requested {
                        self.enter_pause().await;
                        continue;
                    }
                    self.tick().await;
                    tokio::task::yield_now().await;
                }
                Phase::Paused => {
                    let command = tokio::select! {
                        () = self.cancel.cancelled() => None,
                        command = self.command_rx.recv() => command,
                    };
                    match command {
                        Some(command) => self.handle_paused_command(command).await,
                        None => self.force_stopping().await,
                    }
                }
                Phase::Stopping => {
                    self.drain_and_stop().await;
                    break;
                }
                Phase::Idle | Phase::Stopped => break,
            }
        }

        tracing::info!(
            room_id = %self.ctx.room_id(),
            session_id = %self.session_id,
            total_turns = self.ctx.total_turns(),
            "discussion session finished"
        );
    }

    /// One iteration: snapshot -> SVR -> decide -> act.
    async fn tick(&mut self) {
        let view = self.ctx.snapshot();

        let mut scores = tokio::select! {
            () = self.cancel.cancelled() => {
                self.stop_requested = true;
                return;
            }
            scores = self.engine.compute(&view, &self.cfg) => scores,
        };
        for tuple in scores.iter_mut() {
            if self.degraded.contains(&tuple.agent_id) {
                tuple.eligible = false;
            }
        }

        let room_id = view.room_id.clone();
        self.emit(DiscussionEvent::SvrComputed {
            room_id: room_id.clone(),
            scores: scores.clone(),
        })
        .await;

        let decision = decide(&scores, &view, &self.cfg);
        self.emit_decision(&room_id, &decision).await;

        match decision.action {
            DecisionAction::Continue => {
                self.execute_continue(&view, &scores, decision.reason).await;
            }
            DecisionAction::Stop => {
                tracing::info!(room_id = %room_id, reason = %decision.reason, "discussion stopping");
                self.force_stopping().await;
            }
            DecisionAction::Pause => {
                self.pause_origin = Some(PauseOrigin::Failure);
                self.enter_pause().await;
            }
            DecisionAction::RedirectToUser => {
                tracing::info!(room_id = %room_id, "redirecting discussion to the user");
                self.pause_origin = Some(PauseOrigin::Redirect);
                self.enter_pause().await;
            }
        }
    }

    /// Run the selected speaker, substituting down the ranking on failure.
    async fn execute_continue(
        &mut self,
        view: &ContextView,
        scores: &[SvrTuple],
        reason: DecisionReason,
    ) {
        let ranked = ranked_candidates(scores, view, self.cfg.participation_window);
        let max_attempts = 1 + self.cfg.substitutions_per_round as usize;

        for agent_id in ranked.into_iter().take(max_attempts) {
            if self.stop_requested || self.pause_requested || self.cancel.is_cancelled() {
                return;
            }
            let Some(spec) = view
                .participants
                .iter()
                .find(|a| a.agent_id == agent_id)
                .cloned()
            else {
                continue;
            };
            let Some(backend) = self.backends.get(&agent_id).cloned() else {
                self.note_permanent_failure(&agent_id);
                self.emit(DiscussionEvent::TurnFailed {
                    room_id: view.room_id.clone(),
                    agent_id,
                    reason: "no backend configured".to_string(),
                })
                .await;
                continue;
            };

            self.emit(DiscussionEvent::TurnStarted {
                room_id: view.room_id.clone(),
                agent_id: agent_id.clone(),
                agent_name: spec.display_name.clone(),
            })
            .await;

            let request = prompt::build_request(&spec, view, &self.cfg);
            match self.think_watching_commands(backend, request).await {
                Ok(reply) => {
                    let turn = self.ctx.append(TurnDraft {
                        speaker: Speaker::Agent(agent_id),
                        speaker_name: spec.display_name.clone(),
                        content: reply.text,
                        svr_snapshot: Some(scores.to_vec()),
                        decision_reason: Some(reason.as_str().to_string()),
                    });
                    // Emit only after the append: subscribers never observe
                    // a turn that is not in the log.
                    self.emit(DiscussionEvent::TurnCompleted {
                        room_id: view.room_id.clone(),
                        turn: (*turn).clone(),
                    })
                    .await;
                    self.persist_turn(&turn).await;
                    return;
                }
                Err(ThinkError::Canceled) => {
                    self.emit(DiscussionEvent::TurnFailed {
                        room_id: view.room_id.clone(),
                        agent_id,
                        reason: "canceled".to_string(),
                    })
                    .await;
                    return;
                }
                Err(error) => {
                    if matches!(
                        error,
                        ThinkError::Permanent { .. } | ThinkError::PolicyBlocked { .. }
                    ) {
                        self.note_permanent_failure(&agent_id);
                    }
                    tracing::warn!(
                        room_id = %view.room_id,
                        agent_id = %agent_id,
                        %error,
                        "think failed; substituting next candidate"
                    );
                    self.emit(DiscussionEvent::TurnFailed {
                        room_id: view.room_id.clone(),
                        agent_id,
                        reason: error.to_string(),
                    })
                    .await;
                }
            }
        }

        // Selected speaker and every substitute failed.
        self.emit(DiscussionEvent::DecisionMade {
            room_id: view.room_id.clone(),
            action: DecisionAction::Pause,
            selected_agent_id: None,
            reason: DecisionReason::AllAgentsFailed.as_str().to_string(),
        })
        .await;
        self.pause_origin = Some(PauseOrigin::Failure);
        self.enter_pause().await;
    }

    /// Await the think call while keeping the command channel live.
    async fn think_watching_commands(
        &mut self,
        backend: Arc<dyn AgentBackend>,
        request: ThinkRequest,
    ) -> Result<ThinkReply, ThinkError> {
        let think_cancel = self.cancel.child_token();
        let task_token = think_cancel.clone();
        let think_timeout = self.cfg.think_timeout;
        let timeout_ms = think_timeout.as_millis() as u64;

        let fut = async move {
            match tokio::time::timeout(think_timeout, backend.think(request, &task_token)).await {
                Ok(result) => result,
                Err(_) => Err(ThinkError::Timeout { timeout_ms }),
            }
        };
        tokio::pin!(fut);

        loop {
            let wait = tokio::select! {
                result = &mut fut => ThinkWait::Done(result),
                command = self.command_rx.recv() => ThinkWait::Command(command),
            };
            match wait {
                ThinkWait::Done(result) => return result,
                ThinkWait::Command(None) => {
                    self.stop_requested = true;
                    think_cancel.cancel();
                }
                ThinkWait::Command(Some(command)) => {
                    self.apply_command(command);
                    if self.stop_requested {
                        think_cancel.cancel();
                    }
                }
            }
        }
    }

    /// Non-blocking command intake while Running.
    fn drain_pending_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::UserMessage { content, reply_tx } => {
                self.queued_user.push(content);
                let _ = reply_tx.send(Ok(()));
            }
            ControllerCommand::Pause { reply_tx } => {
                self.pause_requested = true;
                self.pause_origin = Some(PauseOrigin::Command);
                let _ = reply_tx.send(Ok(()));
            }
            ControllerCommand::Resume { reply_tx } => {
                let _ = reply_tx.send(Ok(()));
            }
            ControllerCommand::Stop { reply_tx } => {
                self.stop_requested = true;
                let _ = reply_tx.send(Ok(()));
            }
            ControllerCommand::Status { reply_tx } => {
                let _ = reply_tx.send(self.status());
            }
        }
    }

    async fn handle_paused_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::UserMessage { content, reply_tx } => {
                let _ = reply_tx.send(Ok(()));
                self.append_user_turn(content).await;
                // A redirect asked for exactly this input; fresh input also
                // restarts a failure pause. An explicit pause stays parked.
                if matches!(
                    self.pause_origin,
                    Some(PauseOrigin::Redirect) | Some(PauseOrigin::Failure)
                ) {
                    self.pause_origin = None;
                    let _ = self.transition(Phase::Running).await;
                }
            }
            ControllerCommand::Resume { reply_tx } => {
                self.pause_origin = None;
                self.pause_requested = false;
                let result = self.transition(Phase::Running).await;
                let _ = reply_tx.send(result);
            }
            ControllerCommand::Pause { reply_tx } => {
                let _ = reply_tx.send(Ok(()));
            }
            ControllerCommand::Stop { reply_tx } => {
                let _ = reply_tx.send(Ok(()));
                self.force_stopping().await;
            }
            ControllerCommand::Status { reply_tx } => {
                let _ = reply_tx.send(self.status());
            }
        }
    }

    async fn append_user_turn(&mut self, content: String) {
        let turn = self.ctx.append(TurnDraft::user(content));
        self.emit(DiscussionEvent::TurnCompleted {
            room_id: self.ctx.room_id().clone(),
            turn: (*turn).clone(),
        })
        .await;
        self.persist_turn(&turn).await;
    }

    async fn flush_queued_user(&mut self) {
        let queued = std::mem::take(&mut self.queued_user);
        for content in queued {
            self.append_user_turn(content).await;
        }
    }

    async fn enter_pause(&mut self) {
        self.pause_requested = false;
        if let Err(error) = self.transition(Phase::Paused).await {
            tracing::error!(%error, "failed to enter Paused");
            self.force_stopping().await;
        }
    }

    async fn force_stopping(&mut self) {
        if self.ctx.phase() == Phase::Stopping || self.ctx.phase().is_terminal() {
            return;
        }
        if let Err(error) = self.transition(Phase::Stopping).await {
            tracing::error!(%error, "failed to enter Stopping");
            self.phase_cell
                .store(Phase::Stopped as u8, Ordering::Release);
        }
    }

    async fn drain_and_stop(&mut self) {
        self.flush_queued_user().await;
        if !self.persistor.flush(self.cfg.shutdown_grace).await {
            tracing::warn!(
                room_id = %self.ctx.room_id(),
                "persistence flush did not finish within the grace period"
            );
        }
        let _ = self.transition(Phase::Stopped).await;

        // Reject anything still queued so callers unblock.
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                ControllerCommand::Status { reply_tx } => {
                    let _ = reply_tx.send(self.status());
                }
                ControllerCommand::UserMessage { reply_tx, .. }
                | ControllerCommand::Pause { reply_tx }
                | ControllerCommand::Resume { reply_tx }
                | ControllerCommand::Stop { reply_tx } => {
                    let _ = reply_tx.send(Err(EngineError::bad_request(
                        "discussion has stopped",
                    )));
                }
            }
        }
    }

    async fn transition(&mut self, to: Phase) -> Result<(), EngineError> {
        self.ctx.set_phase(to)?;
        self.phase_cell.store(to as u8, Ordering::Release);
        self.emit(DiscussionEvent::PhaseChanged {
            room_id: self.ctx.room_id().clone(),
            phase: to,
        })
        .await;
        Ok(())
    }

    fn note_permanent_failure(&mut self, agent_id: &AgentId) {
        let strikes = self.permanent_strikes.entry(agent_id.clone()).or_insert(0);
        *strikes += 1;
        if *strikes >= PERMANENT_STRIKES_TO_DEGRADE && self.degraded.insert(agent_id.clone()) {
            tracing::warn!(
                room_id = %self.ctx.room_id(),
                agent_id = %agent_id,
                "agent degraded for the remainder of the session"
            );
        }
    }

    async fn persist_turn(&mut self, turn: &Turn) {
        self.persistor.enqueue(turn.clone());
        let lag = self.persistor.lag() as usize;
        if lag > self.cfg.persist_lag_cap {
            if !self.persist_warned {
                self.persist_warned = true;
                self.emit(DiscussionEvent::PersistenceDegraded {
                    room_id: self.ctx.room_id().clone(),
                    lag,
                })
                .await;
            }
        } else {
            self.persist_warned = false;
        }
    }

    async fn emit_decision(&mut self, room_id: &RoomId, decision: &Decision) {
        self.emit(DiscussionEvent::DecisionMade {
            room_id: room_id.clone(),
            action: decision.action,
            selected_agent_id: decision.selected_agent_id.clone(),
            reason: decision.reason.as_str().to_string(),
        })
        .await;
    }

    async fn emit(&self, event: DiscussionEvent) {
        // A dropped receiver means nobody is bridging this room; the
        // discussion itself is unaffected.
        let _ = self.events_tx.send(event).await;
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            room_id: self.ctx.room_id().clone(),
            session_id: self.session_id,
            phase: self.ctx.phase(),
            total_turns: self.ctx.total_turns(),
            round: self.ctx.round(),
            degraded_agents: self.degraded.iter().cloned().collect(),
        }
    }
}
