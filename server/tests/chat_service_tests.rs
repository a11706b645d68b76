mod common;

use chrono::Duration;

use ::common::{ChatRoom, RoomState, UserStatus};
use server::chat_service::{
    CheckSessionOutcome, LeaveChatOutcome, RetrieveMessagesOutcome, SendMessageOutcome,
    StartChatOutcome,
};
use server::clock::Clock;
use server::error::ChatError;
use server::repository::{
    ChatRoomRepository, EventOutcome, EventRepository, MESSAGE_LOG_CAP, UserRepository,
    UserSessionRepository,
};

use crate::common::{message, start_time, test_environment};

async fn pair(env: &crate::common::TestEnvironment, user_a: &str, user_b: &str) -> ChatRoom {
    let waiting = env
        .service
        .start_chat(user_a, None, None, &format!("start-{}", user_a))
        .await
        .unwrap();
    assert_eq!(waiting, StartChatOutcome::Waiting);

    match env
        .service
        .start_chat(user_b, None, None, &format!("start-{}", user_b))
        .await
        .unwrap()
    {
        StartChatOutcome::Created(room) => room,
        other => panic!("expected pairing, got {:?}", other),
    }
}

#[tokio::test]
async fn two_start_chats_pair_into_one_room() {
    let env = test_environment();

    let room = pair(&env, "u1", "u2").await;

    assert_eq!(room.state, RoomState::Occupied);
    assert_eq!(room.participants, vec!["u1".to_string(), "u2".to_string()]);

    let stored = env.store.get_by_id(&room.id).await.unwrap();
    assert_eq!(stored, room);
    assert_eq!(env.store.status("u1").await.unwrap(), Some(UserStatus::InChat));
    assert_eq!(env.store.status("u2").await.unwrap(), Some(UserStatus::InChat));
    assert_eq!(env.store.queued_count(), 0);
}

#[tokio::test]
async fn lone_user_waits_for_a_partner() {
    let env = test_environment();

    let outcome = env
        .service
        .start_chat("u1", None, None, "ev1")
        .await
        .unwrap();

    assert_eq!(outcome, StartChatOutcome::Waiting);
    assert_eq!(env.store.queued_count(), 1);
    assert_eq!(env.store.status("u1").await.unwrap(), Some(UserStatus::Waiting));
}

#[tokio::test]
async fn start_chat_retry_with_same_event_id_is_suppressed() {
    let env = test_environment();

    env.service
        .start_chat("u1", None, None, "ev1")
        .await
        .unwrap();
    let retry = env
        .service
        .start_chat("u1", None, None, "ev1")
        .await
        .unwrap();

    assert_eq!(retry, StartChatOutcome::EventProcessed);
    // Exactly one durable side effect.
    assert_eq!(env.store.queued_count(), 1);
}

#[tokio::test]
async fn no_user_sits_in_two_occupied_rooms() {
    let env = test_environment();

    let first = pair(&env, "u1", "u2").await;
    let second = pair(&env, "u3", "u4").await;
    assert_ne!(first.id, second.id);

    let rooms = env.store.get_all().await.unwrap();
    let mut seen = std::collections::HashSet::new();
    for room in rooms.iter().filter(|r| r.state == RoomState::Occupied) {
        assert_eq!(room.participants.len(), 2);
        for participant in &room.participants {
            assert!(
                seen.insert(participant.clone()),
                "{} appears in two occupied rooms",
                participant
            );
        }
    }
}

#[tokio::test]
async fn event_ids_are_namespaced_per_event() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;

    // The same raw id under a different event name is a distinct event.
    let outcome = env
        .service
        .send_message(&room.id, message("m1", "u1", "hi", env.clock.now()), "start-u1")
        .await
        .unwrap();
    assert!(matches!(outcome, SendMessageOutcome::Sent(_)));
}

#[tokio::test]
async fn send_message_retry_stores_one_copy() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;

    let msg = message("m1", "u1", "hello", start_time());
    let sent = env
        .service
        .send_message(&room.id, msg.clone(), "ev-send")
        .await
        .unwrap();
    assert!(matches!(sent, SendMessageOutcome::Sent(_)));

    let retry = env
        .service
        .send_message(&room.id, msg.clone(), "ev-send")
        .await
        .unwrap();
    assert_eq!(retry, SendMessageOutcome::EventProcessed);

    let log = env.store.retrieve_messages(&room.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, "m1");
}

#[tokio::test]
async fn redelivered_message_id_is_not_stored_twice() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;

    let msg = message("m1", "u1", "hello", start_time());
    env.service
        .send_message(&room.id, msg.clone(), "ev-a")
        .await
        .unwrap();
    // A fresh event id but the same message id: the message layer dedups.
    env.service
        .send_message(&room.id, msg, "ev-b")
        .await
        .unwrap();

    let log = env.store.retrieve_messages(&room.id).await.unwrap();
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn message_log_caps_at_retention_limit() {
    let env = test_environment();
    let now = start_time();

    for i in 0..=MESSAGE_LOG_CAP {
        let msg = message(&format!("m-{}", i), "u1", "x", now);
        env.store.store_message("r1", &msg, now).await.unwrap();
    }

    let log = env.store.retrieve_messages("r1").await.unwrap();
    assert_eq!(log.len(), MESSAGE_LOG_CAP);
    // Oldest entry fell off first.
    assert_eq!(log[0].id, "m-1");
    assert_eq!(log[log.len() - 1].id, format!("m-{}", MESSAGE_LOG_CAP));
}

#[tokio::test]
async fn dedup_window_boundaries() {
    let env = test_environment();

    let first = env
        .store
        .process_once("send-message", "ev1", env.clock.now())
        .await
        .unwrap();
    assert_eq!(first, EventOutcome::FirstTime);

    env.clock.advance(Duration::minutes(4) + Duration::seconds(59));
    let within_window = env
        .store
        .process_once("send-message", "ev1", env.clock.now())
        .await
        .unwrap();
    assert_eq!(within_window, EventOutcome::AlreadyProcessed);

    env.clock.advance(Duration::seconds(2));
    let past_window = env
        .store
        .process_once("send-message", "ev1", env.clock.now())
        .await
        .unwrap();
    assert_eq!(past_window, EventOutcome::FirstTime);
}

#[tokio::test]
async fn leave_chat_runs_the_composite_cleanup() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;
    env.service.store_session("u1").await.unwrap();

    env.service
        .send_message(&room.id, message("m1", "u1", "bye", start_time()), "ev-send")
        .await
        .unwrap();

    let outcome = env
        .service
        .leave_chat(Some(&room.id), Some("u1"), "ev-leave")
        .await
        .unwrap();
    assert_eq!(outcome, LeaveChatOutcome::Left);

    let drained = env.store.get_by_id(&room.id).await.unwrap();
    assert_eq!(drained.state, RoomState::Idle);
    assert_eq!(drained.participants, vec!["u2".to_string()]);

    // Draining room: history dropped, sender's ids freed, session gone.
    assert!(!env.store.has_message_log(&room.id));
    assert!(!env.store.message_id_known("m1"));
    assert_eq!(env.store.status("u1").await.unwrap(), None);
    assert_eq!(env.store.get("u1").await.unwrap(), None);

    // Second departure empties and deletes the room.
    let outcome = env
        .service
        .leave_chat(Some(&room.id), Some("u2"), "ev-leave-2")
        .await
        .unwrap();
    assert_eq!(outcome, LeaveChatOutcome::Left);
    assert!(matches!(
        env.store.get_by_id(&room.id).await,
        Err(ChatError::NotFound { .. })
    ));
}

#[tokio::test]
async fn leave_chat_without_a_room_is_a_noop() {
    let env = test_environment();
    let outcome = env
        .service
        .leave_chat(None, Some("u1"), "ev-leave")
        .await
        .unwrap();
    assert_eq!(outcome, LeaveChatOutcome::NoChatRoom);
}

#[tokio::test]
async fn retrieve_messages_distinguishes_empty_logs() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;

    let empty = env
        .service
        .retrieve_messages(&room.id, "ev-r1")
        .await
        .unwrap();
    assert_eq!(empty, RetrieveMessagesOutcome::NoMessages);

    env.service
        .send_message(&room.id, message("m1", "u1", "hi", start_time()), "ev-send")
        .await
        .unwrap();

    match env
        .service
        .retrieve_messages(&room.id, "ev-r2")
        .await
        .unwrap()
    {
        RetrieveMessagesOutcome::Retrieved(messages) => assert_eq!(messages.len(), 1),
        other => panic!("expected retrieved, got {:?}", other),
    }
}

#[tokio::test]
async fn disconnect_while_waiting_withdraws_the_user() {
    let env = test_environment();
    env.service.store_session("u1").await.unwrap();
    env.service
        .start_chat("u1", None, None, "ev1")
        .await
        .unwrap();

    env.service.disconnect("u1").await.unwrap();

    assert_eq!(env.store.queued_count(), 0);
    assert_eq!(env.store.status("u1").await.unwrap(), None);
    assert_eq!(env.store.get("u1").await.unwrap(), None);
}

#[tokio::test]
async fn disconnect_while_in_chat_keeps_the_room() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;

    env.clock.advance(Duration::minutes(10));
    env.service.disconnect("u1").await.unwrap();

    let intact = env.store.get_by_id(&room.id).await.unwrap();
    assert_eq!(intact.state, RoomState::Occupied);
    assert_eq!(intact.participants.len(), 2);
    assert_eq!(
        env.store.last_active("u1").await.unwrap(),
        Some(env.clock.now())
    );
}

#[tokio::test]
async fn session_recovery_returns_only_missed_messages() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;

    env.clock.advance(Duration::minutes(1));
    env.service
        .send_message(
            &room.id,
            message("m1", "u2", "before drop", env.clock.now()),
            "ev-m1",
        )
        .await
        .unwrap();

    // u1 drops while in-chat; last-active is stamped.
    env.clock.advance(Duration::minutes(1));
    env.service.disconnect("u1").await.unwrap();

    env.clock.advance(Duration::minutes(1));
    env.service
        .send_message(
            &room.id,
            message("m2", "u2", "while away", env.clock.now()),
            "ev-m2",
        )
        .await
        .unwrap();

    let missed = env.service.recover_messages("u1", &room.id).await.unwrap();
    assert_eq!(missed.len(), 1);
    assert_eq!(missed[0].id, "m2");

    match env
        .service
        .check_chat_room_session(&room.id, "u1", "ev-check")
        .await
        .unwrap()
    {
        CheckSessionOutcome::Valid(found) => assert_eq!(found.id, room.id),
        other => panic!("expected valid session, got {:?}", other),
    }

    // start-chat with the surviving session short-circuits matchmaking.
    match env
        .service
        .start_chat("u1", Some("u1"), Some(&room.id), "ev-restart")
        .await
        .unwrap()
    {
        StartChatOutcome::InChat(found) => assert_eq!(found.id, room.id),
        other => panic!("expected in-chat recovery, got {:?}", other),
    }
}

#[tokio::test]
async fn stale_session_is_evicted_on_check() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;
    env.service.store_session("stranger").await.unwrap();

    let outcome = env
        .service
        .check_chat_room_session(&room.id, "stranger", "ev-check")
        .await
        .unwrap();

    assert_eq!(outcome, CheckSessionOutcome::NoSession);
    assert_eq!(env.store.get("stranger").await.unwrap(), None);
}

#[tokio::test]
async fn check_session_against_missing_room_is_no_session() {
    let env = test_environment();
    env.service.store_session("u1").await.unwrap();

    let outcome = env
        .service
        .check_chat_room_session("gone", "u1", "ev-check")
        .await
        .unwrap();

    assert_eq!(outcome, CheckSessionOutcome::NoSession);
}

#[tokio::test]
async fn start_chat_with_stale_room_goes_back_through_matchmaking() {
    let env = test_environment();
    env.store.set_in_chat("u1").await.unwrap();

    let outcome = env
        .service
        .start_chat("u1", Some("u1"), Some("gone"), "ev1")
        .await
        .unwrap();

    assert_eq!(outcome, StartChatOutcome::Waiting);
    assert_eq!(env.store.queued_count(), 1);
}

#[tokio::test]
async fn reaper_reclaims_rooms_idle_past_threshold() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;
    env.service.store_session("u1").await.unwrap();
    env.service.store_session("u2").await.unwrap();

    let fresh_room = pair(&env, "u3", "u4").await;

    env.clock.advance(Duration::days(3));
    // Keep the second room active.
    env.store
        .set_activity(&fresh_room.id, env.clock.now())
        .await
        .unwrap();

    let reclaimed = env
        .service
        .reap_inactive_rooms(Duration::days(2))
        .await
        .unwrap();

    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, room.id);

    // Both participants were cleared, which empties and deletes the room.
    assert!(matches!(
        env.store.get_by_id(&room.id).await,
        Err(ChatError::NotFound { .. })
    ));
    assert!(env.store.get_by_id(&fresh_room.id).await.is_ok());
}

#[tokio::test]
async fn reaper_ignores_active_rooms() {
    let env = test_environment();
    let room = pair(&env, "u1", "u2").await;

    env.clock.advance(Duration::hours(1));
    let reclaimed = env
        .service
        .reap_inactive_rooms(Duration::days(2))
        .await
        .unwrap();

    assert!(reclaimed.is_empty());
    assert!(env.store.get_by_id(&room.id).await.is_ok());
}

#[tokio::test]
async fn repeated_start_outside_window_can_double_queue() {
    let env = test_environment();

    env.service
        .start_chat("u1", None, None, "ev1")
        .await
        .unwrap();
    env.clock.advance(Duration::minutes(5) + Duration::seconds(1));
    let outcome = env
        .service
        .start_chat("u1", None, None, "ev1")
        .await
        .unwrap();

    // Queue dedup is intentionally absent; a replay outside the window
    // enqueues the user a second time.
    assert_eq!(outcome, StartChatOutcome::Waiting);
    assert_eq!(env.store.queued_count(), 2);
}
