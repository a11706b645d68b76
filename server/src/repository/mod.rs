pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::ChatResult;
use common::{ChatMessage, ChatRoom, UserStatus};

/// Outcome of the idempotency check for a client event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// First sighting of this event id; side effects may proceed.
    FirstTime,
    /// Seen within the idempotency window; the action must be a no-op.
    AlreadyProcessed,
}

/// FIFO queue of waiting user identifiers plus their status entries.
#[async_trait]
pub trait UserQueueRepository: Send + Sync {
    /// Appends to the queue and marks the user `waiting`. Duplicate enqueue
    /// produces duplicate FIFO entries.
    async fn enqueue(&self, user_id: &str) -> ChatResult<()>;

    /// Pops the oldest waiting user, if any.
    async fn dequeue_one(&self) -> ChatResult<Option<String>>;

    /// Removes all queue occurrences of the user and clears their status.
    async fn remove_and_clear(&self, user_id: &str) -> ChatResult<()>;
}

/// Durable room records plus the per-room message log.
#[async_trait]
pub trait ChatRoomRepository: Send + Sync {
    async fn create(&self, room_id: &str, user_a: &str, user_b: &str) -> ChatResult<()>;

    /// Drops a participant, demoting the room to idle; deletes the record
    /// once no participants remain.
    async fn leave(&self, room_id: &str, participant: &str) -> ChatResult<()>;

    async fn get_by_id(&self, room_id: &str) -> ChatResult<ChatRoom>;

    async fn get_all(&self) -> ChatResult<Vec<ChatRoom>>;

    /// Appends a message unless its id was already accepted, trims the log
    /// to the retention cap, and stamps sender and room activity.
    async fn store_message(
        &self,
        room_id: &str,
        message: &ChatMessage,
        now: DateTime<Utc>,
    ) -> ChatResult<()>;

    async fn retrieve_messages(&self, room_id: &str) -> ChatResult<Vec<ChatMessage>>;

    /// Messages strictly newer than `since`, for reconnect catch-up.
    async fn missed_messages(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> ChatResult<Vec<ChatMessage>>;

    /// Deletes the room's log only when the record shows exactly one
    /// remaining participant (the room is draining, not racing).
    async fn delete_messages_if_abandoned(&self, room_id: &str) -> ChatResult<()>;

    async fn set_activity(&self, room_id: &str, timestamp: DateTime<Utc>) -> ChatResult<()>;

    async fn delete_activity(&self, room_id: &str) -> ChatResult<()>;

    /// Whether the room's last activity is older than `threshold`.
    async fn is_inactive(
        &self,
        room_id: &str,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> ChatResult<bool>;
}

/// Per-user status and activity bookkeeping.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn status(&self, user_id: &str) -> ChatResult<Option<UserStatus>>;

    async fn set_in_chat(&self, user_id: &str) -> ChatResult<()>;

    async fn set_last_active(&self, user_id: &str, timestamp: DateTime<Utc>) -> ChatResult<()>;

    async fn last_active(&self, user_id: &str) -> ChatResult<Option<DateTime<Utc>>>;

    /// Frees the global id-set entries for everything this sender wrote in
    /// the room. The messages themselves stay in the log.
    async fn remove_message_ids(&self, sender: &str, room_id: &str) -> ChatResult<()>;

    /// Deletes the user's activity and session keys.
    async fn delete_user_keys(&self, session_id: &str) -> ChatResult<()>;
}

/// Stable session tokens surviving reconnects.
#[async_trait]
pub trait UserSessionRepository: Send + Sync {
    async fn store(&self, session_id: &str) -> ChatResult<()>;

    async fn get(&self, session_id: &str) -> ChatResult<Option<String>>;

    async fn remove(&self, session_id: &str) -> ChatResult<()>;
}

/// At-most-once processing of client events within a bounded window.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Atomic membership check + record for `<event_name>:<event_id>`.
    /// Entries older than the idempotency window are pruned on every call.
    async fn process_once(
        &self,
        event_name: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<EventOutcome>;
}

/// Retention cap for each room's message log.
pub const MESSAGE_LOG_CAP: usize = 10_000;

/// Seconds a processed event id suppresses replays.
pub const IDEMPOTENCY_WINDOW_SECS: i64 = 300;
