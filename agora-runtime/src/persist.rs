//! Asynchronous persistence mirror.
//!
//! Turns flow through an unbounded channel into a writer task that appends
//! them to the [`RoomStore`] with at-least-once semantics. The discussion
//! loop never waits on storage; it only watches the lag watermark.

use agora_core::{RoomId, Turn};
use agora_store::RoomStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const APPEND_ATTEMPTS: u32 = 5;
const APPEND_RETRY_BASE: Duration = Duration::from_millis(100);

enum PersistMsg {
    Turn(Box<Turn>),
    Flush(oneshot::Sender<()>),
}

/// Sender half owned by the controller.
pub struct PersistorHandle {
    tx: mpsc::UnboundedSender<PersistMsg>,
    enqueued: Arc<AtomicU64>,
    persisted: Arc<AtomicU64>,
}

impl PersistorHandle {
    /// Queue one turn for durable append. Never blocks.
    pub fn enqueue(&self, turn: Turn) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        // A closed channel means the writer died; the lag watermark will
        // surface it.
        let _ = self.tx.send(PersistMsg::Turn(Box::new(turn)));
    }

    /// Turns accepted but not yet durable.
    pub fn lag(&self) -> u64 {
        self.enqueued
            .load(Ordering::Relaxed)
            .saturating_sub(self.persisted.load(Ordering::Relaxed))
    }

    /// Wait until everything queued so far is durable (or the grace period
    /// expires).
    pub async fn flush(&self, grace: Duration) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PersistMsg::Flush(ack_tx)).is_err() {
            return false;
        }
        tokio::time::timeout(grace, ack_rx).await.is_ok()
    }
}

/// Spawn the writer task for one room.
pub fn spawn_persistor(
    room_id: RoomId,
    store: Arc<dyn RoomStore>,
) -> (PersistorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let enqueued = Arc::new(AtomicU64::new(0));
    let persisted = Arc::new(AtomicU64::new(0));

    let handle = PersistorHandle {
        tx,
        enqueued: Arc::clone(&enqueued),
        persisted: Arc::clone(&persisted),
    };
    let join = tokio::spawn(run_persistor(room_id, store, rx, persisted));
    (handle, join)
}

async fn run_persistor(
    room_id: RoomId,
    store: Arc<dyn RoomStore>,
    mut rx: mpsc::UnboundedReceiver<PersistMsg>,
    persisted: Arc<AtomicU64>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            PersistMsg::Turn(turn) => {
                append_with_retry(&room_id, store.as_ref(), &turn).await;
                persisted.fetch_add(1, Ordering::Relaxed);
            }
            PersistMsg::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn append_with_retry(room_id: &RoomId, store: &dyn RoomStore, turn: &Turn) {
    let turns = std::slice::from_ref(turn);
    for attempt in 0..APPEND_ATTEMPTS {
        match store.append_turns(room_id, turns).await {
            Ok(()) => return,
            Err(error) => {
                tracing::warn!(
                    room_id = %room_id,
                    turn_id = turn.turn_id,
                    attempt,
                    %error,
                    "turn append failed"
                );
                tokio::time::sleep(APPEND_RETRY_BASE * (attempt + 1)).await;
            }
        }
    }
    tracing::error!(
        room_id = %room_id,
        turn_id = turn.turn_id,
        "giving up on turn append after {APPEND_ATTEMPTS} attempts"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::Speaker;
    use agora_store::InMemoryRoomStore;
    use chrono::Utc;

    fn turn(id: u64) -> Turn {
        Turn {
            turn_id: id,
            room_id: RoomId::from("r-1"),
            speaker: Speaker::User,
            speaker_name: "User".to_string(),
            content: "hello".to_string(),
            timestamp: Utc::now(),
            svr_snapshot: None,
            decision_reason: None,
        }
    }

    #[tokio::test]
    async fn test_turns_reach_store_in_order() {
        let store = Arc::new(InMemoryRoomStore::new());
        let (handle, join) = spawn_persistor(RoomId::from("r-1"), store.clone());

        for id in 1..=5 {
            handle.enqueue(turn(id));
        }
        assert!(handle.flush(Duration::from_secs(1)).await);
        assert_eq!(handle.lag(), 0);

        let persisted = store.load_turns(&RoomId::from("r-1")).await.unwrap();
        let ids: Vec<u64> = persisted.iter().map(|t| t.turn_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_lag_counts_unflushed_turns() {
        let store = Arc::new(InMemoryRoomStore::new());
        let (handle, _join) = spawn_persistor(RoomId::from("r-1"), store);
        handle.enqueue(turn(1));
        handle.enqueue(turn(2));
        // Before the writer catches up, lag is visible; after a flush it is
        // zero.
        assert!(handle.flush(Duration::from_secs(1)).await);
        assert_eq!(handle.lag(), 0);
    }
}
