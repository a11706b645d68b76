use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat_service::{
    ChatService, CheckSessionOutcome, LeaveChatOutcome, RetrieveMessagesOutcome,
    SendMessageOutcome, StartChatOutcome,
};
use crate::connections::ConnectionRegistry;
use crate::error::ChatError;
use common::{ChatErrorPayload, ClientEvent, RoomState, ServerEvent, SessionInfo};

/// Shared dependencies for the HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub registry: Arc<ConnectionRegistry>,
}

/// Connection-scoped handshake: a returning client supplies its previous
/// session and room to skip matchmaking.
#[derive(Debug, Deserialize, Default)]
pub struct ConnectParams {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "chatRoomId")]
    pub chat_room_id: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// One task per connection: resolve the session, spawn the writer, replay
/// missed state, then dispatch inbound frames until the socket closes.
pub async fn handle_socket(socket: WebSocket, params: ConnectParams, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();

    let (session_id, recovered_room) = match resolve_session(&state, &params, &connection_id).await
    {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(error = %e, "Failed to establish session, dropping connection");
            return;
        }
    };

    info!(%session_id, "New chat connection");

    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(64);
    state.registry.register(&session_id, event_tx).await;

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to serialize outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    state
        .registry
        .send_to_session(
            &session_id,
            ServerEvent::Session(SessionInfo {
                session_id: session_id.clone(),
                chat_room_id: recovered_room.clone(),
            }),
        )
        .await;

    if let Some(room_id) = &recovered_room {
        recover_chat_room(&state, &session_id, room_id).await;
    }

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_client_event(&state, &session_id, recovered_room.as_deref(), event)
                        .await;
                }
                Err(e) => {
                    warn!(%session_id, error = %e, "Dropping malformed client frame");
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    debug!(%session_id, "Connection closed");

    if let Err(e) = state.service.disconnect(&session_id).await {
        error!(%session_id, error = %e, "Failed to run disconnect cleanup");
    }
    state.registry.unregister(&session_id).await;
    writer.abort();
}

/// Session persistence across reconnects. A recognized handshake session is
/// kept; anything else falls back to the fresh connection id.
async fn resolve_session(
    state: &AppState,
    params: &ConnectParams,
    connection_id: &str,
) -> Result<(String, Option<String>), ChatError> {
    if let (Some(session_id), Some(chat_room_id)) = (&params.session_id, &params.chat_room_id) {
        if state.service.has_session(session_id).await? {
            state.service.store_session(session_id).await?;
            return Ok((session_id.clone(), Some(chat_room_id.clone())));
        }
    }

    state.service.store_session(connection_id).await?;
    Ok((connection_id.to_string(), None))
}

/// Reconnect catch-up: rejoin the room and deliver whatever the session
/// missed while it was away.
async fn recover_chat_room(state: &AppState, session_id: &str, room_id: &str) {
    let room = match state.service.find_room(room_id).await {
        Ok(room) => room,
        Err(ChatError::NotFound { .. }) => {
            debug!(session_id, room_id, "Handshake room no longer exists");
            return;
        }
        Err(e) => {
            emit_error(state, session_id, &e).await;
            return;
        }
    };

    if room.state != RoomState::Occupied {
        return;
    }

    state.registry.join_room(room_id, session_id).await;

    match state.service.recover_messages(session_id, room_id).await {
        Ok(missed) if !missed.is_empty() => {
            state
                .registry
                .send_to_session(session_id, ServerEvent::MissedMessages(missed))
                .await;
        }
        Ok(_) => {}
        // No recorded last-active time means there is nothing to catch up.
        Err(ChatError::Validation(_)) => {
            debug!(session_id, room_id, "No last-active time, skipping catch-up");
        }
        Err(e) => emit_error(state, session_id, &e).await,
    }
}

async fn handle_client_event(
    state: &AppState,
    session_id: &str,
    handshake_room: Option<&str>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::StartChat { user_id, event_id } => {
            match state
                .service
                .start_chat(&user_id, Some(session_id), handshake_room, &event_id)
                .await
            {
                Ok(StartChatOutcome::EventProcessed) | Ok(StartChatOutcome::Waiting) => {
                    ack(state, session_id, &event_id).await;
                }
                Ok(StartChatOutcome::InChat(room)) => {
                    state.registry.join_room(&room.id, session_id).await;
                    state
                        .registry
                        .send_to_session(session_id, ServerEvent::ChatRoomCreated(room))
                        .await;
                    ack(state, session_id, &event_id).await;
                }
                Ok(StartChatOutcome::Created(room)) => {
                    let other = room
                        .participants
                        .iter()
                        .find(|p| p.as_str() != user_id)
                        .cloned();

                    state.registry.join_room(&room.id, session_id).await;
                    state
                        .registry
                        .send_to_session(
                            session_id,
                            ServerEvent::Session(SessionInfo {
                                session_id: session_id.to_string(),
                                chat_room_id: Some(room.id.clone()),
                            }),
                        )
                        .await;
                    state
                        .registry
                        .send_to_session(session_id, ServerEvent::ChatRoomCreated(room.clone()))
                        .await;

                    // The paired peer may be connected to this instance or
                    // another one; the shared room record covers both.
                    if let Some(other) = other {
                        state.registry.join_room(&room.id, &other).await;
                        state
                            .registry
                            .send_to_session(
                                &other,
                                ServerEvent::Session(SessionInfo {
                                    session_id: other.clone(),
                                    chat_room_id: Some(room.id.clone()),
                                }),
                            )
                            .await;
                        state
                            .registry
                            .send_to_session(&other, ServerEvent::ChatRoomCreated(room.clone()))
                            .await;
                    }

                    ack(state, session_id, &event_id).await;
                }
                Err(e) => {
                    error!(session_id, error = %e, "Error in start-chat event");
                    emit_error(state, session_id, &e).await;
                }
            }
        }

        ClientEvent::SendMessage {
            chat_room_id,
            message,
            event_id,
        } => match state
            .service
            .send_message(&chat_room_id, message, &event_id)
            .await
        {
            Ok(SendMessageOutcome::EventProcessed) => {
                ack(state, session_id, &event_id).await;
            }
            Ok(SendMessageOutcome::Sent(message)) => {
                state
                    .registry
                    .send_to_room_except(
                        &chat_room_id,
                        session_id,
                        ServerEvent::ReceiveMessage(message),
                    )
                    .await;
                ack(state, session_id, &event_id).await;
            }
            Err(e) => {
                error!(session_id, error = %e, "Error in send-message event");
                emit_error(state, session_id, &e).await;
            }
        },

        ClientEvent::LeaveChat {
            chat_room_id,
            event_id,
        } => match state
            .service
            .leave_chat(Some(&chat_room_id), Some(session_id), &event_id)
            .await
        {
            Ok(LeaveChatOutcome::EventProcessed) => {
                ack(state, session_id, &event_id).await;
            }
            Ok(LeaveChatOutcome::Left) => {
                state
                    .registry
                    .send_to_room_except(
                        &chat_room_id,
                        session_id,
                        ServerEvent::LeftChat {
                            session_id: session_id.to_string(),
                        },
                    )
                    .await;
                state.registry.leave_room(&chat_room_id, session_id).await;
                ack(state, session_id, &event_id).await;
            }
            Ok(LeaveChatOutcome::NoChatRoom) => {
                warn!(session_id, "No chat room found for leave-chat");
                ack(state, session_id, &event_id).await;
            }
            Err(e) => {
                error!(session_id, error = %e, "Error in leave-chat event");
                emit_error(state, session_id, &e).await;
            }
        },

        ClientEvent::RetrieveChatMessages {
            chat_room_id,
            event_id,
        } => match state
            .service
            .retrieve_messages(&chat_room_id, &event_id)
            .await
        {
            Ok(RetrieveMessagesOutcome::EventProcessed) => {
                ack(state, session_id, &event_id).await;
            }
            Ok(RetrieveMessagesOutcome::Retrieved(messages)) => {
                state
                    .registry
                    .send_to_room(&chat_room_id, ServerEvent::ChatHistory(messages))
                    .await;
                ack(state, session_id, &event_id).await;
            }
            Ok(RetrieveMessagesOutcome::NoMessages) => {
                debug!(session_id, %chat_room_id, "No messages to retrieve");
                ack(state, session_id, &event_id).await;
            }
            Err(e) => {
                error!(session_id, error = %e, "Error in retrieve-chat-messages event");
                emit_error(state, session_id, &e).await;
            }
        },

        ClientEvent::CheckChatRoomSession {
            chat_room_id,
            session_id: checked_session,
            event_id,
        } => match state
            .service
            .check_chat_room_session(&chat_room_id, &checked_session, &event_id)
            .await
        {
            Ok(CheckSessionOutcome::EventProcessed) => {
                ack(state, session_id, &event_id).await;
            }
            Ok(CheckSessionOutcome::Valid(room)) => {
                state
                    .registry
                    .send_to_session(session_id, ServerEvent::ReceiveChatRoomSession(Some(room)))
                    .await;
                ack(state, session_id, &event_id).await;
            }
            Ok(CheckSessionOutcome::NoSession) => {
                state
                    .registry
                    .send_to_session(session_id, ServerEvent::ReceiveChatRoomSession(None))
                    .await;
                ack(state, session_id, &event_id).await;
            }
            Err(e) => {
                error!(session_id, error = %e, "Error in check-chatRoom-session event");
                emit_error(state, session_id, &e).await;
            }
        },
    }
}

async fn ack(state: &AppState, session_id: &str, event_id: &str) {
    state
        .registry
        .send_to_session(session_id, ServerEvent::ack(event_id))
        .await;
}

async fn emit_error(state: &AppState, session_id: &str, error: &ChatError) {
    state
        .registry
        .send_to_session(
            session_id,
            ServerEvent::ChatError(ChatErrorPayload {
                status: "error".to_string(),
                error_code: error.error_code(),
                message: error.client_message(),
                details: error.details(),
            }),
        )
        .await;
}
