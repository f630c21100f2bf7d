//! Optional eviction of sessions that have gone quiet

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::PresenceHub;

/// Periodically close sessions idle for longer than `idle_timeout`.
///
/// Each eviction goes through the normal close path, so the registry entry
/// is released, presence is rebroadcast and the session's transport loop
/// ends. Stops when `shutdown` is cancelled.
pub fn spawn_idle_sweeper(
    hub: Arc<PresenceHub>,
    idle_timeout: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            idle_timeout = ?idle_timeout,
            interval = ?interval,
            "Idle session sweeper started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = hub.lifecycle().evict_idle(idle_timeout);
                    if evicted.is_empty() {
                        debug!("Idle sweep found nothing to evict");
                    } else {
                        info!(evicted = evicted.len(), "Evicted idle sessions");
                    }
                }
            }
        }

        info!("Idle session sweeper stopped");
    })
}
