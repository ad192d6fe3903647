use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ClientRegistry;

/// Background liveness sweep with a lifecycle tied to the server process:
/// started once at startup, stopped at shutdown. Each tick moves approved
/// clients whose last heartbeat exceeds `timeout` to offline.
pub struct LivenessSweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LivenessSweeper {
    pub fn start(
        registry: Arc<ClientRegistry>,
        interval: Duration,
        timeout: chrono::Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a restart doesn't
            // sweep clients that simply haven't reported since boot.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = registry.sweep_stale(Utc::now(), timeout).await;
                        if swept > 0 {
                            info!(count = swept, "Marked clients offline due to missed heartbeats");
                        } else {
                            debug!("Liveness sweep found no stale clients");
                        }
                    }
                }
            }
            debug!("Liveness sweeper stopped");
        });

        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = timeout.num_seconds(),
            "Liveness sweeper started"
        );
        Self { cancel, handle }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
