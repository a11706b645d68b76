use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::{
    ChatRoomRepository, EventOutcome, EventRepository, IDEMPOTENCY_WINDOW_SECS, MESSAGE_LOG_CAP,
    UserQueueRepository, UserRepository, UserSessionRepository,
};
use crate::error::{ChatError, ChatResult};
use crate::redis_keys::RedisKeys;
use common::{ChatMessage, ChatRoom, RoomState, UserStatus};

/// Redis-backed matchmaking queue.
#[derive(Clone)]
pub struct RedisUserQueueRepository {
    conn: ConnectionManager,
}

impl RedisUserQueueRepository {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UserQueueRepository for RedisUserQueueRepository {
    async fn enqueue(&self, user_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .lpush(RedisKeys::user_queue(), user_id)
            .await
            .map_err(|e| ChatError::store("Failed to add user to queue", e))?;
        let _: () = conn
            .hset(RedisKeys::user_status(), user_id, UserStatus::Waiting.as_str())
            .await
            .map_err(|e| ChatError::store("Failed to add user to queue", e))?;
        Ok(())
    }

    async fn dequeue_one(&self) -> ChatResult<Option<String>> {
        let mut conn = self.conn.clone();
        let user: Option<String> = conn
            .rpop(RedisKeys::user_queue(), None)
            .await
            .map_err(|e| ChatError::store("Failed to dequeue user", e))?;
        Ok(user)
    }

    async fn remove_and_clear(&self, user_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .lrem(RedisKeys::user_queue(), 0, user_id)
            .await
            .map_err(|e| ChatError::store("Failed to remove user from queue", e))?;
        let _: () = conn
            .hdel(RedisKeys::user_status(), user_id)
            .await
            .map_err(|e| ChatError::store("Failed to remove user from queue", e))?;
        Ok(())
    }
}

/// Redis-backed room directory and message log.
#[derive(Clone)]
pub struct RedisChatRoomRepository {
    conn: ConnectionManager,
}

impl RedisChatRoomRepository {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn load_room(&self, room_id: &str) -> ChatResult<Option<ChatRoom>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(RedisKeys::chat_rooms(), room_id)
            .await
            .map_err(|e| ChatError::store("Failed to get chat room", e))?;

        match raw {
            Some(json) => {
                let room = serde_json::from_str(&json).map_err(|e| {
                    ChatError::store_with(
                        "Failed to get chat room",
                        serde_json::json!({ "cause": e.to_string(), "chatRoomId": room_id }),
                    )
                })?;
                Ok(Some(room))
            }
            None => Ok(None),
        }
    }

    async fn write_room(&self, room: &ChatRoom) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(room).map_err(|e| {
            ChatError::store_with(
                "Failed to write chat room",
                serde_json::json!({ "cause": e.to_string() }),
            )
        })?;
        let _: () = conn
            .hset(RedisKeys::chat_rooms(), &room.id, json)
            .await
            .map_err(|e| ChatError::store("Failed to write chat room", e))?;
        Ok(())
    }
}

#[async_trait]
impl ChatRoomRepository for RedisChatRoomRepository {
    async fn create(&self, room_id: &str, user_a: &str, user_b: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let room = ChatRoom::occupied(room_id, user_a, user_b);
        let json = serde_json::to_string(&room).map_err(|e| {
            ChatError::store_with(
                "Failed to create chat room",
                serde_json::json!({ "cause": e.to_string() }),
            )
        })?;

        let added: i64 = conn
            .hset(RedisKeys::chat_rooms(), room_id, json)
            .await
            .map_err(|e| ChatError::store("Failed to create chat room", e))?;

        // A fresh UUID must land as a new hash field.
        if added == 0 {
            return Err(ChatError::store_with(
                "Failed to create chat room",
                serde_json::json!({ "id": room_id, "participants": [user_a, user_b] }),
            ));
        }

        Ok(())
    }

    async fn leave(&self, room_id: &str, participant: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let mut room = self
            .load_room(room_id)
            .await?
            .ok_or_else(|| ChatError::not_found("Chat room not found"))?;

        if let Some(index) = room.participants.iter().position(|p| p == participant) {
            room.participants.remove(index);
            room.state = RoomState::Idle;

            let _: () = conn
                .hdel(RedisKeys::user_status(), participant)
                .await
                .map_err(|e| ChatError::store("Failed to leave chat room", e))?;

            self.write_room(&room).await?;
        }

        if room.participants.is_empty() {
            let _: () = conn
                .hdel(RedisKeys::chat_rooms(), room_id)
                .await
                .map_err(|e| ChatError::store("Failed to leave chat room", e))?;
        }

        Ok(())
    }

    async fn get_by_id(&self, room_id: &str) -> ChatResult<ChatRoom> {
        self.load_room(room_id).await?.ok_or_else(|| {
            ChatError::not_found_with(
                "Chat room not found",
                serde_json::json!({ "chatRoomId": room_id }),
            )
        })
    }

    async fn get_all(&self) -> ChatResult<Vec<ChatRoom>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .hvals(RedisKeys::chat_rooms())
            .await
            .map_err(|e| ChatError::store("Failed to get chat rooms", e))?;

        raw.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| {
                    ChatError::store_with(
                        "Failed to get chat rooms",
                        serde_json::json!({ "cause": e.to_string() }),
                    )
                })
            })
            .collect()
    }

    async fn store_message(
        &self,
        room_id: &str,
        message: &ChatMessage,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        let mut conn = self.conn.clone();

        let already_stored: bool = conn
            .sismember(RedisKeys::message_ids(), &message.id)
            .await
            .map_err(|e| ChatError::store("Failed to store message", e))?;

        if already_stored {
            debug!(message_id = %message.id, "Message id already accepted, skipping store");
            return Ok(());
        }

        let key = RedisKeys::room_messages(room_id);
        let json = serde_json::to_string(message).map_err(|e| {
            ChatError::store_with(
                "Failed to store message",
                serde_json::json!({ "cause": e.to_string() }),
            )
        })?;

        let _: () = conn
            .sadd(RedisKeys::message_ids(), &message.id)
            .await
            .map_err(|e| ChatError::store("Failed to store message", e))?;
        let _: () = conn
            .rpush(&key, json)
            .await
            .map_err(|e| ChatError::store("Failed to store message", e))?;

        let len: usize = conn
            .llen(&key)
            .await
            .map_err(|e| ChatError::store("Failed to store message", e))?;

        if len > MESSAGE_LOG_CAP {
            // Keeps the most recent entries; oldest fall off first.
            let _: () = conn
                .ltrim(&key, -(MESSAGE_LOG_CAP as isize), -1)
                .await
                .map_err(|e| ChatError::store("Failed to store message", e))?;
        }

        let stamp = now.to_rfc3339();
        let _: () = conn
            .set(RedisKeys::user_last_activity(&message.sender), &stamp)
            .await
            .map_err(|e| ChatError::store("Failed to store message", e))?;
        let _: () = conn
            .set(RedisKeys::room_last_activity(room_id), &stamp)
            .await
            .map_err(|e| ChatError::store("Failed to store message", e))?;

        Ok(())
    }

    async fn retrieve_messages(&self, room_id: &str) -> ChatResult<Vec<ChatMessage>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(RedisKeys::room_messages(room_id), 0, -1)
            .await
            .map_err(|e| ChatError::store("Failed to retrieve messages", e))?;

        raw.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| {
                    ChatError::store_with(
                        "Failed to retrieve messages",
                        serde_json::json!({ "cause": e.to_string() }),
                    )
                })
            })
            .collect()
    }

    async fn missed_messages(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> ChatResult<Vec<ChatMessage>> {
        let since =
            since.ok_or_else(|| ChatError::Validation("No last active time provided".to_string()))?;

        let messages = self.retrieve_messages(room_id).await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.timestamp > since)
            .collect())
    }

    async fn delete_messages_if_abandoned(&self, room_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();

        // A missing record means the room is already fully emptied; there is
        // nothing left to guard.
        let Some(room) = self.load_room(room_id).await? else {
            return Ok(());
        };

        if room.participants.len() == 1 {
            let _: () = conn
                .del(RedisKeys::room_messages(room_id))
                .await
                .map_err(|e| ChatError::store("Failed to delete chat room messages", e))?;
        }

        Ok(())
    }

    async fn set_activity(&self, room_id: &str, timestamp: DateTime<Utc>) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(RedisKeys::room_last_activity(room_id), timestamp.to_rfc3339())
            .await
            .map_err(|e| ChatError::store("Failed to set chat room activity", e))?;
        Ok(())
    }

    async fn delete_activity(&self, room_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(RedisKeys::room_last_activity(room_id))
            .await
            .map_err(|e| ChatError::store("Failed to delete chat room related keys", e))?;
        Ok(())
    }

    async fn is_inactive(
        &self,
        room_id: &str,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> ChatResult<bool> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(RedisKeys::room_last_activity(room_id))
            .await
            .map_err(|e| ChatError::store("Failed to check inactivity", e))?;

        let raw = raw.ok_or_else(|| ChatError::not_found("Last active time not found"))?;
        let last_active = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| {
                ChatError::store_with(
                    "Failed to check inactivity",
                    serde_json::json!({ "cause": e.to_string() }),
                )
            })?
            .with_timezone(&Utc);

        Ok(now - last_active > threshold)
    }
}

/// Redis-backed user status and activity bookkeeping.
#[derive(Clone)]
pub struct RedisUserRepository {
    conn: ConnectionManager,
}

impl RedisUserRepository {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UserRepository for RedisUserRepository {
    async fn status(&self, user_id: &str) -> ChatResult<Option<UserStatus>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(RedisKeys::user_status(), user_id)
            .await
            .map_err(|e| ChatError::store("Failed to check user status", e))?;

        match raw {
            Some(value) => {
                let status = value.parse().map_err(|e: String| {
                    ChatError::store_with(
                        "Failed to check user status",
                        serde_json::json!({ "cause": e }),
                    )
                })?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    async fn set_in_chat(&self, user_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(RedisKeys::user_status(), user_id, UserStatus::InChat.as_str())
            .await
            .map_err(|e| ChatError::store("Failed to set user status", e))?;
        Ok(())
    }

    async fn set_last_active(&self, user_id: &str, timestamp: DateTime<Utc>) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(RedisKeys::user_last_activity(user_id), timestamp.to_rfc3339())
            .await
            .map_err(|e| ChatError::store("Failed to set last active time", e))?;
        Ok(())
    }

    async fn last_active(&self, user_id: &str) -> ChatResult<Option<DateTime<Utc>>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(RedisKeys::user_last_activity(user_id))
            .await
            .map_err(|e| ChatError::store("Failed to get last active time", e))?;

        match raw {
            Some(value) => {
                let parsed = DateTime::parse_from_rfc3339(&value).map_err(|e| {
                    ChatError::store_with(
                        "Failed to get last active time",
                        serde_json::json!({ "cause": e.to_string() }),
                    )
                })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    async fn remove_message_ids(&self, sender: &str, room_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(RedisKeys::room_messages(room_id), 0, -1)
            .await
            .map_err(|e| ChatError::store("Failed to remove user message ids", e))?;

        let mut sender_ids = Vec::new();
        for json in &raw {
            let message: ChatMessage = serde_json::from_str(json).map_err(|e| {
                ChatError::store_with(
                    "Failed to remove user message ids",
                    serde_json::json!({ "cause": e.to_string() }),
                )
            })?;
            if message.sender == sender {
                sender_ids.push(message.id);
            }
        }

        if !sender_ids.is_empty() {
            let _: () = conn
                .srem(RedisKeys::message_ids(), sender_ids)
                .await
                .map_err(|e| ChatError::store("Failed to remove user message ids", e))?;
        }

        Ok(())
    }

    async fn delete_user_keys(&self, session_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let keys = [
            RedisKeys::user_last_activity(session_id),
            RedisKeys::user_session(session_id),
        ];
        let _: () = conn
            .del(&keys[..])
            .await
            .map_err(|e| ChatError::store("Failed to delete user related keys", e))?;
        Ok(())
    }
}

/// Redis-backed session correlator.
#[derive(Clone)]
pub struct RedisUserSessionRepository {
    conn: ConnectionManager,
}

impl RedisUserSessionRepository {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UserSessionRepository for RedisUserSessionRepository {
    async fn store(&self, session_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(RedisKeys::user_session(session_id), session_id)
            .await
            .map_err(|e| ChatError::store("Failed to store user session id", e))?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> ChatResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(RedisKeys::user_session(session_id))
            .await
            .map_err(|e| ChatError::store("Failed to get user session id", e))?;
        Ok(value)
    }

    async fn remove(&self, session_id: &str) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(RedisKeys::user_session(session_id))
            .await
            .map_err(|e| ChatError::store("Failed to remove user session id", e))?;
        Ok(())
    }
}

/// Redis-backed event deduplicator over a sorted set scored by unix seconds.
#[derive(Clone)]
pub struct RedisEventRepository {
    conn: ConnectionManager,
}

impl RedisEventRepository {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn prune(&self, now: DateTime<Utc>) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let cutoff = now.timestamp() - IDEMPOTENCY_WINDOW_SECS;
        let _: () = conn
            .zrembyscore(RedisKeys::processed_events(), "-inf", cutoff)
            .await
            .map_err(|e| ChatError::store("Failed to remove old events", e))?;
        Ok(())
    }
}

#[async_trait]
impl EventRepository for RedisEventRepository {
    async fn process_once(
        &self,
        event_name: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<EventOutcome> {
        let mut conn = self.conn.clone();
        let member = RedisKeys::processed_event_member(event_name, event_id);

        let score: Option<f64> = conn
            .zscore(RedisKeys::processed_events(), &member)
            .await
            .map_err(|e| ChatError::store("Failed to check if event is processed", e))?;

        if score.is_some() {
            debug!(event = %member, "Event already processed");
            self.prune(now).await?;
            return Ok(EventOutcome::AlreadyProcessed);
        }

        let _: () = conn
            .zadd(RedisKeys::processed_events(), &member, now.timestamp())
            .await
            .map_err(|e| ChatError::store("Failed to store event", e))?;

        self.prune(now).await?;
        Ok(EventOutcome::FirstTime)
    }
}
