use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, mpsc};
use tracing::warn;

use common::ServerEvent;

/// Per-instance registry of live WebSocket connections and room membership.
///
/// Maps session ids to the channel feeding their socket writer, and room ids
/// to the sessions joined on this instance. Durable state stays in the
/// store; this only routes outbound events.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    senders: HashMap<String, mpsc::Sender<ServerEvent>>,
    rooms: HashMap<String, HashSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryState::default()),
        }
    }

    /// Register a session's outbound channel.
    pub async fn register(&self, session_id: &str, sender: mpsc::Sender<ServerEvent>) {
        let mut state = self.inner.write().await;
        state.senders.insert(session_id.to_string(), sender);
    }

    /// Drop a session's channel and any room memberships it held.
    pub async fn unregister(&self, session_id: &str) {
        let mut state = self.inner.write().await;
        state.senders.remove(session_id);
        for members in state.rooms.values_mut() {
            members.remove(session_id);
        }
        state.rooms.retain(|_, members| !members.is_empty());
    }

    pub async fn join_room(&self, room_id: &str, session_id: &str) {
        let mut state = self.inner.write().await;
        state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(session_id.to_string());
    }

    pub async fn leave_room(&self, room_id: &str, session_id: &str) {
        let mut state = self.inner.write().await;
        if let Some(members) = state.rooms.get_mut(room_id) {
            members.remove(session_id);
            if members.is_empty() {
                state.rooms.remove(room_id);
            }
        }
    }

    /// Send an event to one session, if it is connected to this instance.
    pub async fn send_to_session(&self, session_id: &str, event: ServerEvent) {
        let state = self.inner.read().await;
        if let Some(sender) = state.senders.get(session_id) {
            if sender.send(event).await.is_err() {
                warn!(session_id, "Outbound channel closed, dropping event");
            }
        }
    }

    /// Send an event to every session joined on a room.
    pub async fn send_to_room(&self, room_id: &str, event: ServerEvent) {
        self.send_to_room_inner(room_id, None, event).await;
    }

    /// Send an event to a room, skipping one session (usually the sender).
    pub async fn send_to_room_except(&self, room_id: &str, except: &str, event: ServerEvent) {
        self.send_to_room_inner(room_id, Some(except), event).await;
    }

    async fn send_to_room_inner(&self, room_id: &str, except: Option<&str>, event: ServerEvent) {
        let state = self.inner.read().await;
        let Some(members) = state.rooms.get(room_id) else {
            return;
        };

        for member in members {
            if Some(member.as_str()) == except {
                continue;
            }
            if let Some(sender) = state.senders.get(member) {
                if sender.send(event.clone()).await.is_err() {
                    warn!(session_id = %member, "Outbound channel closed, dropping event");
                }
            }
        }
    }

    /// Drop all membership entries for a room (the sessions stay connected).
    pub async fn drop_room(&self, room_id: &str) {
        let mut state = self.inner.write().await;
        state.rooms.remove(room_id);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_to_room_members_except_sender() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);

        registry.register("a", tx_a).await;
        registry.register("b", tx_b).await;
        registry.join_room("r1", "a").await;
        registry.join_room("r1", "b").await;

        registry
            .send_to_room_except("r1", "a", ServerEvent::ack("ev1"))
            .await;

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_removes_membership() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);

        registry.register("a", tx).await;
        registry.join_room("r1", "a").await;
        registry.unregister("a").await;

        registry.send_to_room("r1", ServerEvent::ack("ev1")).await;
        assert!(rx.try_recv().is_err());
    }
}
