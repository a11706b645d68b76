use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use super::{
    ChatRoomRepository, EventOutcome, EventRepository, IDEMPOTENCY_WINDOW_SECS, MESSAGE_LOG_CAP,
    UserQueueRepository, UserRepository, UserSessionRepository,
};
use crate::error::{ChatError, ChatResult};
use common::{ChatMessage, ChatRoom, RoomState, UserStatus};

/// In-memory backend implementing every repository trait over one mutex.
///
/// Mirrors the Redis backend's semantics operation for operation so the
/// service can be exercised without a running store.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    // Front = newest push, back = oldest; pops come from the back.
    queue: VecDeque<String>,
    status: HashMap<String, UserStatus>,
    rooms: HashMap<String, ChatRoom>,
    messages: HashMap<String, Vec<ChatMessage>>,
    message_ids: HashSet<String>,
    sessions: HashMap<String, String>,
    user_activity: HashMap<String, DateTime<Utc>>,
    room_activity: HashMap<String, DateTime<Utc>>,
    processed_events: HashMap<String, i64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue length, for assertions.
    pub fn queued_count(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Whether a message id is still held in the global id-set.
    pub fn message_id_known(&self, message_id: &str) -> bool {
        self.state.lock().unwrap().message_ids.contains(message_id)
    }

    /// Whether the room still has a message log at all.
    pub fn has_message_log(&self, room_id: &str) -> bool {
        self.state.lock().unwrap().messages.contains_key(room_id)
    }
}

#[async_trait]
impl UserQueueRepository for InMemoryStore {
    async fn enqueue(&self, user_id: &str) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        state.queue.push_front(user_id.to_string());
        state.status.insert(user_id.to_string(), UserStatus::Waiting);
        Ok(())
    }

    async fn dequeue_one(&self) -> ChatResult<Option<String>> {
        Ok(self.state.lock().unwrap().queue.pop_back())
    }

    async fn remove_and_clear(&self, user_id: &str) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        state.queue.retain(|entry| entry != user_id);
        state.status.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl ChatRoomRepository for InMemoryStore {
    async fn create(&self, room_id: &str, user_a: &str, user_b: &str) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .rooms
            .insert(room_id.to_string(), ChatRoom::occupied(room_id, user_a, user_b));
        Ok(())
    }

    async fn leave(&self, room_id: &str, participant: &str) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();

        let Some(room) = state.rooms.get_mut(room_id) else {
            return Err(ChatError::not_found("Chat room not found"));
        };

        if let Some(index) = room.participants.iter().position(|p| p == participant) {
            room.participants.remove(index);
            room.state = RoomState::Idle;
            state.status.remove(participant);
        }

        let now_empty = state
            .rooms
            .get(room_id)
            .map(|room| room.participants.is_empty())
            .unwrap_or(false);
        if now_empty {
            state.rooms.remove(room_id);
        }

        Ok(())
    }

    async fn get_by_id(&self, room_id: &str) -> ChatResult<ChatRoom> {
        self.state
            .lock()
            .unwrap()
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| {
                ChatError::not_found_with(
                    "Chat room not found",
                    serde_json::json!({ "chatRoomId": room_id }),
                )
            })
    }

    async fn get_all(&self) -> ChatResult<Vec<ChatRoom>> {
        Ok(self.state.lock().unwrap().rooms.values().cloned().collect())
    }

    async fn store_message(
        &self,
        room_id: &str,
        message: &ChatMessage,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();

        if state.message_ids.contains(&message.id) {
            return Ok(());
        }

        state.message_ids.insert(message.id.clone());
        let log = state.messages.entry(room_id.to_string()).or_default();
        log.push(message.clone());
        if log.len() > MESSAGE_LOG_CAP {
            let excess = log.len() - MESSAGE_LOG_CAP;
            log.drain(..excess);
        }

        state.user_activity.insert(message.sender.clone(), now);
        state.room_activity.insert(room_id.to_string(), now);
        Ok(())
    }

    async fn retrieve_messages(&self, room_id: &str) -> ChatResult<Vec<ChatMessage>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn missed_messages(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> ChatResult<Vec<ChatMessage>> {
        let since =
            since.ok_or_else(|| ChatError::Validation("No last active time provided".to_string()))?;

        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .get(room_id)
            .map(|log| {
                log.iter()
                    .filter(|m| m.timestamp > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_messages_if_abandoned(&self, room_id: &str) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();

        let draining = state
            .rooms
            .get(room_id)
            .map(|room| room.participants.len() == 1)
            .unwrap_or(false);
        if draining {
            state.messages.remove(room_id);
        }

        Ok(())
    }

    async fn set_activity(&self, room_id: &str, timestamp: DateTime<Utc>) -> ChatResult<()> {
        self.state
            .lock()
            .unwrap()
            .room_activity
            .insert(room_id.to_string(), timestamp);
        Ok(())
    }

    async fn delete_activity(&self, room_id: &str) -> ChatResult<()> {
        self.state.lock().unwrap().room_activity.remove(room_id);
        Ok(())
    }

    async fn is_inactive(
        &self,
        room_id: &str,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> ChatResult<bool> {
        let state = self.state.lock().unwrap();
        let last_active = state
            .room_activity
            .get(room_id)
            .ok_or_else(|| ChatError::not_found("Last active time not found"))?;
        Ok(now - *last_active > threshold)
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn status(&self, user_id: &str) -> ChatResult<Option<UserStatus>> {
        Ok(self.state.lock().unwrap().status.get(user_id).copied())
    }

    async fn set_in_chat(&self, user_id: &str) -> ChatResult<()> {
        self.state
            .lock()
            .unwrap()
            .status
            .insert(user_id.to_string(), UserStatus::InChat);
        Ok(())
    }

    async fn set_last_active(&self, user_id: &str, timestamp: DateTime<Utc>) -> ChatResult<()> {
        self.state
            .lock()
            .unwrap()
            .user_activity
            .insert(user_id.to_string(), timestamp);
        Ok(())
    }

    async fn last_active(&self, user_id: &str) -> ChatResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().unwrap().user_activity.get(user_id).copied())
    }

    async fn remove_message_ids(&self, sender: &str, room_id: &str) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        let sender_ids: Vec<String> = state
            .messages
            .get(room_id)
            .map(|log| {
                log.iter()
                    .filter(|m| m.sender == sender)
                    .map(|m| m.id.clone())
                    .collect()
            })
            .unwrap_or_default();

        for id in sender_ids {
            state.message_ids.remove(&id);
        }
        Ok(())
    }

    async fn delete_user_keys(&self, session_id: &str) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        state.user_activity.remove(session_id);
        state.sessions.remove(session_id);
        Ok(())
    }
}

#[async_trait]
impl UserSessionRepository for InMemoryStore {
    async fn store(&self, session_id: &str) -> ChatResult<()> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(session_id.to_string(), session_id.to_string());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> ChatResult<Option<String>> {
        Ok(self.state.lock().unwrap().sessions.get(session_id).cloned())
    }

    async fn remove(&self, session_id: &str) -> ChatResult<()> {
        self.state.lock().unwrap().sessions.remove(session_id);
        Ok(())
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn process_once(
        &self,
        event_name: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<EventOutcome> {
        let mut state = self.state.lock().unwrap();
        let member = crate::redis_keys::RedisKeys::processed_event_member(event_name, event_id);
        let cutoff = now.timestamp() - IDEMPOTENCY_WINDOW_SECS;

        state.processed_events.retain(|_, score| *score >= cutoff);

        if state.processed_events.contains_key(&member) {
            return Ok(EventOutcome::AlreadyProcessed);
        }

        state.processed_events.insert(member, now.timestamp());
        Ok(EventOutcome::FirstTime)
    }
}
