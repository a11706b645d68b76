use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use ::common::ChatMessage;
use server::chat_service::ChatService;
use server::clock::ManualClock;
use server::repository::memory::InMemoryStore;

pub struct TestEnvironment {
    pub service: Arc<ChatService>,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Service wired to the in-memory store and a manually advanced clock.
pub fn test_environment() -> TestEnvironment {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let service = Arc::new(ChatService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
    ));

    TestEnvironment {
        service,
        store,
        clock,
    }
}

#[allow(dead_code)]
pub fn message(id: &str, sender: &str, body: &str, at: DateTime<Utc>) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        sender: sender.to_string(),
        message: body.to_string(),
        timestamp: at,
    }
}
