pub struct RedisKeys;

impl RedisKeys {
    // === Matchmaking ===

    /// FIFO list of waiting user identifiers.
    pub fn user_queue() -> String {
        "userQueue".to_string()
    }

    /// Hash of user identifier -> "waiting" | "in-chat".
    pub fn user_status() -> String {
        "userStatus".to_string()
    }

    // === Rooms and messages ===

    /// Hash of room id -> serialized room record.
    pub fn chat_rooms() -> String {
        "chatRooms".to_string()
    }

    /// Per-room ordered message log.
    pub fn room_messages(room_id: &str) -> String {
        format!("chatRoom:{}:messages", room_id)
    }

    /// Global set of accepted message ids (delivery-retry dedup).
    pub fn message_ids() -> String {
        "chatMessageIds".to_string()
    }

    // === Sessions and activity ===

    pub fn user_session(session_id: &str) -> String {
        format!("user:{}:sessionId", session_id)
    }

    pub fn user_last_activity(user_id: &str) -> String {
        format!("user:{}:lastActivity", user_id)
    }

    pub fn room_last_activity(room_id: &str) -> String {
        format!("chatRoom:{}:lastActivity", room_id)
    }

    // === Idempotency ===

    /// Sorted set of "<eventName>:<eventId>" -> processed-at unix seconds.
    pub fn processed_events() -> String {
        "processedEvents".to_string()
    }

    pub fn processed_event_member(event_name: &str, event_id: &str) -> String {
        format!("{}:{}", event_name, event_id)
    }
}
