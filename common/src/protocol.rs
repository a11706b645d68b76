use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chat::{ChatMessage, ChatRoom};

/// Client-to-server frames. Event names are part of the wire contract and
/// must not change.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "start-chat")]
    StartChat {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "eventId")]
        event_id: String,
    },
    #[serde(rename = "send-message")]
    SendMessage {
        #[serde(rename = "chatRoomId")]
        chat_room_id: String,
        message: ChatMessage,
        #[serde(rename = "eventId")]
        event_id: String,
    },
    #[serde(rename = "leave-chat")]
    LeaveChat {
        #[serde(rename = "chatRoomId")]
        chat_room_id: String,
        #[serde(rename = "eventId")]
        event_id: String,
    },
    #[serde(rename = "retrieve-chat-messages")]
    RetrieveChatMessages {
        #[serde(rename = "chatRoomId")]
        chat_room_id: String,
        #[serde(rename = "eventId")]
        event_id: String,
    },
    #[serde(rename = "check-chatRoom-session")]
    CheckChatRoomSession {
        #[serde(rename = "chatRoomId")]
        chat_room_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "eventId")]
        event_id: String,
    },
}

impl ClientEvent {
    /// Wire name of the event, used as the idempotency namespace.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StartChat { .. } => "start-chat",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::LeaveChat { .. } => "leave-chat",
            ClientEvent::RetrieveChatMessages { .. } => "retrieve-chat-messages",
            ClientEvent::CheckChatRoomSession { .. } => "check-chatRoom-session",
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            ClientEvent::StartChat { event_id, .. }
            | ClientEvent::SendMessage { event_id, .. }
            | ClientEvent::LeaveChat { event_id, .. }
            | ClientEvent::RetrieveChatMessages { event_id, .. }
            | ClientEvent::CheckChatRoomSession { event_id, .. } => event_id,
        }
    }
}

/// Session descriptor pushed to a client on connect and on pairing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionInfo {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "chatRoomId", skip_serializing_if = "Option::is_none")]
    pub chat_room_id: Option<String>,
}

/// Error payload surfaced to clients as a `chat-error` frame.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatErrorPayload {
    pub status: String,
    #[serde(rename = "errorCode")]
    pub error_code: u16,
    pub message: String,
    pub details: JsonValue,
}

/// Server-to-client frames.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Acknowledges a client frame by its event id.
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "eventId")]
        event_id: String,
        status: String,
    },
    #[serde(rename = "session")]
    Session(SessionInfo),
    #[serde(rename = "chatRoom-created")]
    ChatRoomCreated(ChatRoom),
    #[serde(rename = "receive-message")]
    ReceiveMessage(ChatMessage),
    #[serde(rename = "left-chat")]
    LeftChat {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "chat-history")]
    ChatHistory(Vec<ChatMessage>),
    #[serde(rename = "receive-chatRoom-session")]
    ReceiveChatRoomSession(Option<ChatRoom>),
    #[serde(rename = "missed-messages")]
    MissedMessages(Vec<ChatMessage>),
    #[serde(rename = "inactive-chatRoom")]
    InactiveChatRoom(ChatRoom),
    #[serde(rename = "chat-error")]
    ChatError(ChatErrorPayload),
}

impl ServerEvent {
    pub fn ack(event_id: impl Into<String>) -> Self {
        ServerEvent::Ack {
            event_id: event_id.into(),
            status: "ok".to_string(),
        }
    }
}
