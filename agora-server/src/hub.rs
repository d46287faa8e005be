//! Client hub: connection registry, room subscriptions, and fan-out.
//!
//! Delivery is best-effort broadcast. A subscriber whose outbound buffer
//! cannot accept a frame within the publish timeout is dropped and must
//! re-subscribe; one slow client never stalls a room.

use crate::wire::WireFrame;
use agora_core::RoomId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Identifier of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cross-room shared state: who is connected and who watches which room.
pub struct ClientHub {
    publish_timeout: Duration,
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<String>>>,
    room_subs: RwLock<HashMap<RoomId, HashSet<ConnectionId>>>,
    room_seq: RwLock<HashMap<RoomId, u64>>,
}

impl ClientHub {
    pub fn new(publish_timeout: Duration) -> Self {
        Self {
            publish_timeout,
            connections: RwLock::new(HashMap::new()),
            room_subs: RwLock::new(HashMap::new()),
            room_seq: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection's outbound channel.
    pub async fn register(&self, id: ConnectionId, sender: mpsc::Sender<String>) {
        self.connections.write().await.insert(id, sender);
    }

    /// Remove a connection and all of its subscriptions.
    pub async fn unregister(&self, id: &ConnectionId) {
        self.connections.write().await.remove(id);
        let mut subs = self.room_subs.write().await;
        for members in subs.values_mut() {
            members.remove(id);
        }
    }

    /// Subscribe a connection to a room's events.
    pub async fn subscribe(&self, room_id: &RoomId, id: ConnectionId) {
        self.room_subs
            .write()
            .await
            .entry(room_id.clone())
            .or_default()
            .insert(id);
    }

    pub async fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.room_subs
            .read()
            .await
            .get(room_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Next per-room sequence. Turn events pin the sequence to their turn
    /// id; other events keep it strictly increasing past it.
    async fn next_sequence(&self, room_id: &RoomId, turn_id: Option<u64>) -> u64 {
        let mut seqs = self.room_seq.write().await;
        let last = seqs.entry(room_id.clone()).or_insert(0);
        let next = match turn_id {
            Some(id) => id.max(*last + 1),
            None => *last + 1,
        };
        *last = next;
        next
    }

    /// Broadcast one event to a room's subscribers.
    pub async fn publish(
        &self,
        room_id: &RoomId,
        kind: &str,
        payload: serde_json::Value,
        turn_id: Option<u64>,
    ) {
        let sequence = self.next_sequence(room_id, turn_id).await;
        let frame = WireFrame {
            kind: kind.to_string(),
            room_id: Some(room_id.clone()),
            sequence,
            payload,
        };
        let text = frame.to_json();

        let subscribers: Vec<ConnectionId> = {
            let subs = self.room_subs.read().await;
            subs.get(room_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
        };
        if subscribers.is_empty() {
            return;
        }

        let mut stale = Vec::new();
        {
            let connections = self.connections.read().await;
            for id in subscribers {
                let Some(sender) = connections.get(&id) else {
                    stale.push(id);
                    continue;
                };
                let delivery =
                    tokio::time::timeout(self.publish_timeout, sender.send(text.clone())).await;
                match delivery {
                    Ok(Ok(())) => {}
                    _ => {
                        // Full buffer past the deadline or a closed channel:
                        // drop the subscriber, it must re-subscribe.
                        tracing::warn!(
                            connection_id = %id,
                            room_id = %room_id,
                            "dropping slow or dead subscriber"
                        );
                        stale.push(id);
                    }
                }
            }
        }
        for id in stale {
            self.unregister(&id).await;
        }
    }

    /// Send a frame to one connection (replies, welcome frames).
    pub async fn send_to(&self, id: &ConnectionId, frame: WireFrame) {
        let sender = {
            let connections = self.connections.read().await;
            connections.get(id).cloned()
        };
        if let Some(sender) = sender {
            let delivery =
                tokio::time::timeout(self.publish_timeout, sender.send(frame.to_json())).await;
            if !matches!(delivery, Ok(Ok(()))) {
                self.unregister(id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn hub() -> ClientHub {
        ClientHub::new(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_only() {
        let hub = hub();
        let room_a = RoomId::from("a");
        let room_b = RoomId::from("b");

        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let c1 = ConnectionId::new();
        let c2 = ConnectionId::new();
        hub.register(c1, tx1).await;
        hub.register(c2, tx2).await;
        hub.subscribe(&room_a, c1).await;
        hub.subscribe(&room_b, c2).await;

        hub.publish(&room_a, "phase_changed", json!({"phase": "running"}), None)
            .await;

        let frame: Value = serde_json::from_str(&rx1.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "phase_changed");
        assert_eq!(frame["room_id"], "a");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sequence_monotonic_and_pinned_to_turn_ids() {
        let hub = hub();
        let room = RoomId::from("a");
        let (tx, mut rx) = mpsc::channel(16);
        let c = ConnectionId::new();
        hub.register(c, tx).await;
        hub.subscribe(&room, c).await;

        hub.publish(&room, "svr_computed", json!({}), None).await;
        hub.publish(&room, "new_message", json!({}), Some(5)).await;
        hub.publish(&room, "decision_made", json!({}), None).await;
        hub.publish(&room, "new_message", json!({}), Some(6)).await;

        let mut sequences = Vec::new();
        for _ in 0..4 {
            let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            sequences.push(frame["sequence"].as_u64().unwrap());
        }
        // Turn events pin to their ids; others stay strictly increasing,
        // even past a turn id that lags the counter.
        assert_eq!(sequences, vec![1, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let hub = hub();
        let room = RoomId::from("a");

        // Capacity-1 channel that is never drained: the second publish
        // cannot be accepted within the timeout.
        let (tx, _rx_keepalive) = mpsc::channel(1);
        let slow = ConnectionId::new();
        hub.register(slow, tx).await;
        hub.subscribe(&room, slow).await;

        hub.publish(&room, "svr_computed", json!({}), None).await;
        assert_eq!(hub.subscriber_count(&room).await, 1);
        hub.publish(&room, "svr_computed", json!({}), None).await;
        assert_eq!(hub.subscriber_count(&room).await, 0);
    }

    #[tokio::test]
    async fn test_unregister_clears_subscriptions() {
        let hub = hub();
        let room = RoomId::from("a");
        let (tx, _rx) = mpsc::channel(8);
        let c = ConnectionId::new();
        hub.register(c, tx).await;
        hub.subscribe(&room, c).await;
        hub.unregister(&c).await;
        assert_eq!(hub.subscriber_count(&room).await, 0);
    }
}
