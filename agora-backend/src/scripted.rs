//! Deterministic in-process backend for tests.
//!
//! Outcomes are drained from a queue; an empty queue yields numbered echo
//! replies so loops keep making progress without scripting every turn.

use crate::error::ThinkError;
use crate::types::{AgentBackend, ThinkReply, ThinkRequest, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one scripted call does.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Return this text.
    Reply(String),
    /// Fail with this error.
    Fail(ThinkError),
    /// Sleep (cancellable), then return this text. Used to exercise
    /// timeouts and mid-think control commands.
    DelayedReply(Duration, String),
}

/// Scripted [`AgentBackend`].
#[derive(Debug)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ThinkRequest>>,
}

impl ScriptedBackend {
    pub fn new(outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Backend that always echoes numbered replies.
    pub fn echoing() -> Self {
        Self::new([])
    }

    /// Backend that replies with the given texts in order, echoing after.
    pub fn replies<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptedOutcome::Reply(t.into())))
    }

    /// Push another outcome onto the script.
    pub fn push(&self, outcome: ScriptedOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Number of think calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request, for asserting on prompt construction.
    pub fn last_request(&self) -> Option<ThinkRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        let queued = self.script.lock().unwrap().pop_front();
        match queued {
            Some(outcome) => outcome,
            None => ScriptedOutcome::Reply(format!(
                "scripted reply {}",
                self.calls.load(Ordering::SeqCst)
            )),
        }
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn think(
        &self,
        request: ThinkRequest,
        cancel: &CancellationToken,
    ) -> Result<ThinkReply, ThinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);

        match self.next_outcome() {
            ScriptedOutcome::Reply(text) => Ok(ThinkReply {
                text,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 10,
                },
            }),
            ScriptedOutcome::Fail(err) => Err(err),
            ScriptedOutcome::DelayedReply(delay, text) => {
                tokio::select! {
                    () = cancel.cancelled() => Err(ThinkError::Canceled),
                    () = tokio::time::sleep(delay) => Ok(ThinkReply {
                        text,
                        usage: TokenUsage {
                            input_tokens: 10,
                            output_tokens: 10,
                        },
                    }),
                }
            }
        }
    }

    fn platform(&self) -> &'static str {
        "scripted"
    }

    async fn health_check(&self, _model: &str) -> Result<(), ThinkError> {
        Ok(())
    }
}
