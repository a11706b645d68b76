use serde_json::Value as JsonValue;
use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Typed errors crossing the repository/service boundary.
///
/// `NotFound` propagates verbatim up to the client; `Store` wraps the raw
/// Redis failure with a details payload kept for diagnostics while the
/// client only ever sees a generic message. `Validation` is caller misuse
/// and is never retried.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{message}")]
    NotFound { message: String, details: JsonValue },

    #[error("{message}")]
    Store { message: String, details: JsonValue },

    #[error("{0}")]
    Validation(String),
}

impl ChatError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ChatError::NotFound {
            message: message.into(),
            details: JsonValue::Null,
        }
    }

    pub fn not_found_with(message: impl Into<String>, details: JsonValue) -> Self {
        ChatError::NotFound {
            message: message.into(),
            details,
        }
    }

    pub fn store(message: impl Into<String>, source: redis::RedisError) -> Self {
        ChatError::Store {
            message: message.into(),
            details: serde_json::json!({ "cause": source.to_string() }),
        }
    }

    pub fn store_with(message: impl Into<String>, details: JsonValue) -> Self {
        ChatError::Store {
            message: message.into(),
            details,
        }
    }

    /// Coarse error code carried on the `chat-error` wire frame.
    pub fn error_code(&self) -> u16 {
        match self {
            ChatError::NotFound { .. } => 404,
            ChatError::Store { .. } | ChatError::Validation(_) => 500,
        }
    }

    /// Message safe to show a client. Store internals never leak.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::NotFound { message, .. } => message.clone(),
            ChatError::Store { .. } => "A storage error occurred".to_string(),
            ChatError::Validation(_) => "An unexpected error occurred".to_string(),
        }
    }

    pub fn details(&self) -> JsonValue {
        match self {
            ChatError::NotFound { details, .. } | ChatError::Store { details, .. } => details.clone(),
            ChatError::Validation(_) => JsonValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_taxonomy() {
        assert_eq!(ChatError::not_found("Chat room not found").error_code(), 404);
        assert_eq!(
            ChatError::store_with("Failed to store message", JsonValue::Null).error_code(),
            500
        );
        assert_eq!(ChatError::Validation("missing timestamp".into()).error_code(), 500);
    }

    #[test]
    fn store_errors_never_leak_internals() {
        let err = ChatError::store_with(
            "Failed to dequeue user",
            serde_json::json!({ "cause": "connection refused to 10.0.0.1:6379" }),
        );
        assert_eq!(err.client_message(), "A storage error occurred");
        // The diagnostic payload is still there for logs.
        assert!(err.details()["cause"].as_str().unwrap().contains("6379"));
    }

    #[test]
    fn not_found_message_propagates_verbatim() {
        let err = ChatError::not_found("Chat room not found");
        assert_eq!(err.client_message(), "Chat room not found");
    }
}
