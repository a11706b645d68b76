use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a chat room.
///
/// `Occupied` always means exactly two participants; `Idle` means one
/// participant has left and the other may still be draining.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    Occupied,
    Idle,
}

/// A two-party chat room shared across server instances.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatRoom {
    pub id: String,
    pub state: RoomState,
    pub participants: Vec<String>,
}

impl ChatRoom {
    pub fn occupied(id: impl Into<String>, user_a: impl Into<String>, user_b: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: RoomState::Occupied,
            participants: vec![user_a.into(), user_b.into()],
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// A single chat message. Immutable once stored.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Matchmaking status of a user, keyed by their identifier in a shared hash.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "in-chat")]
    InChat,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Waiting => "waiting",
            UserStatus::InChat => "in-chat",
        }
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(UserStatus::Waiting),
            "in-chat" => Ok(UserStatus::InChat),
            other => Err(format!("unknown user status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn room_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RoomState::Occupied).unwrap(), "\"occupied\"");
        assert_eq!(serde_json::to_string(&RoomState::Idle).unwrap(), "\"idle\"");
    }

    #[test]
    fn user_status_round_trips_wire_names() {
        assert_eq!(UserStatus::Waiting.as_str(), "waiting");
        assert_eq!(UserStatus::InChat.as_str(), "in-chat");
        assert_eq!("in-chat".parse::<UserStatus>().unwrap(), UserStatus::InChat);
        assert!("gone".parse::<UserStatus>().is_err());
    }

    #[test]
    fn chat_message_timestamp_is_rfc3339() {
        let message = ChatMessage {
            id: "m1".to_string(),
            sender: "s1".to_string(),
            message: "hello".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["timestamp"], "2024-05-01T12:30:00Z");
        assert_eq!(json["sender"], "s1");
    }

    #[test]
    fn chat_room_participant_lookup() {
        let room = ChatRoom::occupied("r1", "a", "b");
        assert_eq!(room.state, RoomState::Occupied);
        assert!(room.has_participant("a"));
        assert!(!room.has_participant("c"));
    }
}
