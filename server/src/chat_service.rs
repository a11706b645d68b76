use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ChatError, ChatResult};
use crate::repository::{
    ChatRoomRepository, EventOutcome, EventRepository, UserQueueRepository, UserRepository,
    UserSessionRepository,
};
use common::{ChatMessage, ChatRoom, UserStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum StartChatOutcome {
    EventProcessed,
    /// Recovery path: the caller is already in this room.
    InChat(ChatRoom),
    /// Two waiting users were paired into a fresh room.
    Created(ChatRoom),
    Waiting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendMessageOutcome {
    EventProcessed,
    Sent(ChatMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaveChatOutcome {
    EventProcessed,
    Left,
    NoChatRoom,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrieveMessagesOutcome {
    EventProcessed,
    Retrieved(Vec<ChatMessage>),
    NoMessages,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckSessionOutcome {
    EventProcessed,
    Valid(ChatRoom),
    NoSession,
}

/// The pairing/room/session state machine. Sole writer of room and session
/// records; every transport-facing operation goes through here.
pub struct ChatService {
    rooms: Arc<dyn ChatRoomRepository>,
    queue: Arc<dyn UserQueueRepository>,
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn UserSessionRepository>,
    events: Arc<dyn EventRepository>,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(
        rooms: Arc<dyn ChatRoomRepository>,
        queue: Arc<dyn UserQueueRepository>,
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn UserSessionRepository>,
        events: Arc<dyn EventRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rooms,
            queue,
            users,
            sessions,
            events,
            clock,
        }
    }

    async fn already_processed(&self, event_name: &str, event_id: &str) -> ChatResult<bool> {
        let outcome = self
            .events
            .process_once(event_name, event_id, self.clock.now())
            .await?;
        Ok(outcome == EventOutcome::AlreadyProcessed)
    }

    /// Queue the user and try to pair, unless the caller can be recovered
    /// straight into the room it already occupies.
    pub async fn start_chat(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        chat_room_id: Option<&str>,
        event_id: &str,
    ) -> ChatResult<StartChatOutcome> {
        if self.already_processed("start-chat", event_id).await? {
            return Ok(StartChatOutcome::EventProcessed);
        }

        if let (Some(session_id), Some(chat_room_id)) = (session_id, chat_room_id) {
            let status = self.users.status(session_id).await?;

            // A stale room id is not an error here; the caller just goes
            // back through matchmaking.
            match self.rooms.get_by_id(chat_room_id).await {
                Ok(room) if status == Some(UserStatus::InChat) && room.has_participant(session_id) => {
                    debug!(session_id, chat_room_id, "Recovered existing chat session");
                    return Ok(StartChatOutcome::InChat(room));
                }
                Ok(_) | Err(ChatError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.queue.enqueue(user_id).await?;

        match self.pair_users().await? {
            Some(room) => Ok(StartChatOutcome::Created(room)),
            None => Ok(StartChatOutcome::Waiting),
        }
    }

    pub async fn send_message(
        &self,
        chat_room_id: &str,
        message: ChatMessage,
        event_id: &str,
    ) -> ChatResult<SendMessageOutcome> {
        if self.already_processed("send-message", event_id).await? {
            return Ok(SendMessageOutcome::EventProcessed);
        }

        self.rooms
            .store_message(chat_room_id, &message, self.clock.now())
            .await?;
        Ok(SendMessageOutcome::Sent(message))
    }

    pub async fn leave_chat(
        &self,
        chat_room_id: Option<&str>,
        session_id: Option<&str>,
        event_id: &str,
    ) -> ChatResult<LeaveChatOutcome> {
        if self.already_processed("leave-chat", event_id).await? {
            return Ok(LeaveChatOutcome::EventProcessed);
        }

        if let (Some(session_id), Some(chat_room_id)) = (session_id, chat_room_id) {
            self.clear_user(session_id, chat_room_id).await?;
            return Ok(LeaveChatOutcome::Left);
        }

        Ok(LeaveChatOutcome::NoChatRoom)
    }

    pub async fn retrieve_messages(
        &self,
        chat_room_id: &str,
        event_id: &str,
    ) -> ChatResult<RetrieveMessagesOutcome> {
        if self
            .already_processed("retrieve-chat-messages", event_id)
            .await?
        {
            return Ok(RetrieveMessagesOutcome::EventProcessed);
        }

        let messages = self.rooms.retrieve_messages(chat_room_id).await?;
        if messages.is_empty() {
            return Ok(RetrieveMessagesOutcome::NoMessages);
        }
        Ok(RetrieveMessagesOutcome::Retrieved(messages))
    }

    /// Confirms a session still belongs to a room; evicts the stale session
    /// mapping otherwise.
    pub async fn check_chat_room_session(
        &self,
        chat_room_id: &str,
        session_id: &str,
        event_id: &str,
    ) -> ChatResult<CheckSessionOutcome> {
        if self
            .already_processed("check-chatRoom-session", event_id)
            .await?
        {
            return Ok(CheckSessionOutcome::EventProcessed);
        }

        match self.rooms.get_by_id(chat_room_id).await {
            Ok(room) if room.has_participant(session_id) => Ok(CheckSessionOutcome::Valid(room)),
            Ok(_) | Err(ChatError::NotFound { .. }) => {
                self.sessions.remove(session_id).await?;
                Ok(CheckSessionOutcome::NoSession)
            }
            Err(e) => Err(e),
        }
    }

    /// Transport-level disconnect. A waiting user is withdrawn entirely; a
    /// user in a chat only gets their last-active time stamped, the room
    /// stays up for reconnection.
    pub async fn disconnect(&self, session_id: &str) -> ChatResult<()> {
        match self.users.status(session_id).await? {
            Some(UserStatus::Waiting) => {
                let (removed, dropped) = tokio::join!(
                    self.queue.remove_and_clear(session_id),
                    self.sessions.remove(session_id),
                );
                removed?;
                dropped?;
                debug!(session_id, "Waiting user withdrawn on disconnect");
            }
            Some(UserStatus::InChat) => {
                self.users
                    .set_last_active(session_id, self.clock.now())
                    .await?;
                debug!(session_id, "In-chat user disconnected, room kept for recovery");
            }
            None => {}
        }
        Ok(())
    }

    async fn pair_users(&self) -> ChatResult<Option<ChatRoom>> {
        let first = self.queue.dequeue_one().await?;
        let second = self.queue.dequeue_one().await?;

        match (first, second) {
            (Some(user_a), Some(user_b)) => {
                let room_id = Uuid::new_v4().to_string();

                self.rooms.create(&room_id, &user_a, &user_b).await?;
                self.users.set_in_chat(&user_a).await?;
                self.users.set_in_chat(&user_b).await?;
                self.rooms.set_activity(&room_id, self.clock.now()).await?;

                info!(%room_id, %user_a, %user_b, "Paired users into chat room");
                Ok(Some(ChatRoom::occupied(room_id, user_a, user_b)))
            }
            (first, second) => {
                // Not enough waiting users; put back whoever was popped.
                if let Some(user) = first {
                    self.queue.enqueue(&user).await?;
                }
                if let Some(user) = second {
                    self.queue.enqueue(&user).await?;
                }
                Ok(None)
            }
        }
    }

    /// Composite departure cleanup. All five operations are attempted; the
    /// first failure is surfaced after the rest have run.
    pub async fn clear_user(&self, session_id: &str, chat_room_id: &str) -> ChatResult<()> {
        let (ids, left, log, user_keys, activity) = tokio::join!(
            self.users.remove_message_ids(session_id, chat_room_id),
            self.rooms.leave(chat_room_id, session_id),
            self.rooms.delete_messages_if_abandoned(chat_room_id),
            self.users.delete_user_keys(session_id),
            self.rooms.delete_activity(chat_room_id),
        );
        ids?;
        left?;
        log?;
        user_keys?;
        activity?;
        Ok(())
    }

    /// HTTP read path lookup.
    pub async fn find_room(&self, chat_room_id: &str) -> ChatResult<ChatRoom> {
        self.rooms.get_by_id(chat_room_id).await
    }

    /// Messages a reconnecting session missed since it was last active.
    pub async fn recover_messages(
        &self,
        session_id: &str,
        chat_room_id: &str,
    ) -> ChatResult<Vec<ChatMessage>> {
        let last_active = self.users.last_active(session_id).await?;
        self.rooms.missed_messages(chat_room_id, last_active).await
    }

    pub async fn store_session(&self, session_id: &str) -> ChatResult<()> {
        self.sessions.store(session_id).await
    }

    pub async fn has_session(&self, session_id: &str) -> ChatResult<bool> {
        Ok(self.sessions.get(session_id).await?.is_some())
    }

    /// One reaper sweep: collect rooms idle past `threshold`, run the
    /// departure cleanup for every resolvable participant session, and
    /// report what was reclaimed.
    pub async fn reap_inactive_rooms(&self, threshold: Duration) -> ChatResult<Vec<ChatRoom>> {
        let rooms = self.rooms.get_all().await?;
        let now = self.clock.now();
        let mut reclaimed = Vec::new();

        for room in rooms {
            let inactive = match self.rooms.is_inactive(&room.id, threshold, now).await {
                Ok(inactive) => inactive,
                // No activity record left: a crash-leftover room, reclaimable.
                Err(ChatError::NotFound { .. }) => {
                    debug!(room_id = %room.id, "Room has no activity record, treating as inactive");
                    true
                }
                Err(e) => return Err(e),
            };

            if !inactive {
                continue;
            }

            for participant in &room.participants {
                if let Some(session_id) = self.sessions.get(participant).await? {
                    self.clear_user(&session_id, &room.id).await?;
                }
            }

            info!(room_id = %room.id, "Reclaimed inactive chat room");
            reclaimed.push(room);
        }

        Ok(reclaimed)
    }
}
