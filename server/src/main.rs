use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use server::chat_service::ChatService;
use server::clock::SystemClock;
use server::connections::ConnectionRegistry;
use server::http_server::run_http_server;
use server::reaper::{ReaperConfig, run_reaper};
use server::redis_utils;
use server::repository::redis::{
    RedisChatRoomRepository, RedisEventRepository, RedisUserQueueRepository, RedisUserRepository,
    RedisUserSessionRepository,
};
use server::ws_server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if exists
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let redis_url = env::var("CHAT_REDIS_URL")
        .context("CHAT_REDIS_URL must be set in environment or .env file")?;
    let http_port = env::var("CHAT_HTTP_PORT").unwrap_or_else(|_| "3000".to_string());
    let http_addr = format!("0.0.0.0:{}", http_port);
    let cors_origin = env::var("CHAT_CORS_ORIGIN").ok();

    let reaper_interval_secs: u64 = env::var("CHAT_REAPER_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60 * 60);
    let inactivity_secs: i64 = env::var("CHAT_ROOM_INACTIVITY_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2 * 24 * 60 * 60);

    let client =
        redis::Client::open(redis_url.as_str()).context("Failed to create Redis client")?;
    let conn = redis_utils::create_connection_manager(client).await?;

    let service = Arc::new(ChatService::new(
        Arc::new(RedisChatRoomRepository::new(conn.clone())),
        Arc::new(RedisUserQueueRepository::new(conn.clone())),
        Arc::new(RedisUserRepository::new(conn.clone())),
        Arc::new(RedisUserSessionRepository::new(conn.clone())),
        Arc::new(RedisEventRepository::new(conn)),
        Arc::new(SystemClock),
    ));
    let registry = Arc::new(ConnectionRegistry::new());

    let cancellation_token = CancellationToken::new();

    let reaper_config = ReaperConfig {
        interval: Duration::from_secs(reaper_interval_secs),
        inactivity_threshold: chrono::Duration::seconds(inactivity_secs),
    };
    tokio::spawn(run_reaper(
        service.clone(),
        registry.clone(),
        reaper_config,
        cancellation_token.clone(),
    ));

    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal. Shutting down gracefully...");
            shutdown_token.cancel();
        }
    });

    let state = AppState { service, registry };
    run_http_server(&http_addr, state, cors_origin, cancellation_token).await?;

    info!("Server shut down successfully");
    Ok(())
}
