use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chat_service::ChatService;
use crate::connections::ConnectionRegistry;
use common::ServerEvent;

const MAX_SWEEP_ATTEMPTS: u32 = 3;

/// Reaper schedule. Both knobs are injectable so tests never wait on real
/// hours.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub inactivity_threshold: chrono::Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            inactivity_threshold: chrono::Duration::days(2),
        }
    }
}

/// Periodic sweep reclaiming rooms idle past the threshold. Failures are
/// retried and logged; nothing here ever reaches a client as an error.
pub async fn run_reaper(
    service: Arc<ChatService>,
    registry: Arc<ConnectionRegistry>,
    config: ReaperConfig,
    cancellation_token: CancellationToken,
) {
    info!(
        interval_secs = config.interval.as_secs(),
        threshold_secs = config.inactivity_threshold.num_seconds(),
        "Starting inactivity reaper"
    );

    let mut tick_interval = interval(config.interval);
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("Inactivity reaper received shutdown signal");
                break;
            }
            _ = tick_interval.tick() => {}
        }

        sweep_with_retry(&service, &registry, config.inactivity_threshold).await;
    }
}

async fn sweep_with_retry(
    service: &ChatService,
    registry: &ConnectionRegistry,
    threshold: chrono::Duration,
) {
    for attempt in 1..=MAX_SWEEP_ATTEMPTS {
        match service.reap_inactive_rooms(threshold).await {
            Ok(reclaimed) => {
                for room in reclaimed {
                    registry
                        .send_to_room(&room.id, ServerEvent::InactiveChatRoom(room.clone()))
                        .await;
                    registry.drop_room(&room.id).await;
                }
                return;
            }
            Err(e) if attempt < MAX_SWEEP_ATTEMPTS => {
                warn!(attempt, error = %e, "Reaper sweep failed, retrying");
            }
            Err(e) => {
                error!(error = %e, "Failed to clean inactive chat rooms");
            }
        }
    }
}
