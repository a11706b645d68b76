pub mod chat_service;
pub mod clock;
pub mod connections;
pub mod error;
pub mod http_server;
pub mod reaper;
pub mod redis_keys;
pub mod redis_utils;
pub mod repository;
pub mod ws_server;
