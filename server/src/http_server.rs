use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::error::ChatError;
use crate::ws_server::{AppState, websocket_handler};

/// Build the application router: the WebSocket endpoint plus the read-only
/// chat room lookup.
pub fn build_router(state: AppState, cors_origin: Option<String>) -> Result<Router> {
    let cors = match cors_origin {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .map_err(|e| anyhow::anyhow!("Invalid CHAT_CORS_ORIGIN: {}", e))?;
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Ok(Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .route("/chats/:chat_room_id", get(get_chat_room))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Run the combined HTTP server with graceful shutdown.
pub async fn run_http_server(
    addr: &str,
    state: AppState,
    cors_origin: Option<String>,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let app = build_router(state, cors_origin)?;

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server (API + WebSocket) listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancellation_token.cancelled().await;
            info!("HTTP server received shutdown signal");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
}

/// `GET /chats/:chatRoomId` — 200 with the room record, 409 when the room
/// doesn't exist.
async fn get_chat_room(
    Path(chat_room_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.service.find_room(&chat_room_id).await {
        Ok(room) => (StatusCode::OK, Json(room)).into_response(),
        Err(ChatError::NotFound { .. }) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "message": "Chat room doesn't exist" })),
        )
            .into_response(),
        Err(e) => {
            error!(%chat_room_id, error = %e, "Failed to look up chat room");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": e.client_message() })),
            )
                .into_response()
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
