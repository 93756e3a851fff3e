//! Retention pruner.
//!
//! Runs on its own timer, independent of sampling, and deletes measurements
//! older than the configured horizon. Failures are logged and retried on the
//! next cycle.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::state::AppState;

/// Background task that enforces the retention horizon.
pub struct Pruner {
    state: Arc<AppState>,
}

impl Pruner {
    /// Create a new pruner.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Delete every measurement older than the horizon relative to `now`.
    ///
    /// Returns the number of rows removed. Running it twice with the same
    /// `now` removes nothing the second time.
    pub async fn prune_once(&self, now: i64) -> Result<u64, airqmon_store::Error> {
        let horizon = self.state.config.read().await.retention.horizon_secs();
        let cutoff = now.saturating_sub(horizon);

        let removed = self.state.store.lock().await.delete_older_than(cutoff)?;
        if removed > 0 {
            info!("Pruned {} measurement(s) older than {}", removed, cutoff);
        } else {
            debug!("Nothing to prune before {}", cutoff);
        }
        Ok(removed)
    }

    /// Start pruning in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run the pruning loop until the stop signal is raised.
    pub async fn run(self) {
        let every = self.state.config.read().await.retention.prune_interval();
        let mut stop_rx = self.state.subscribe_stop();
        info!("Starting pruner (every {}s)", every.as_secs());

        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = stop_rx.changed() => {}
            }
            if *stop_rx.borrow() {
                break;
            }

            let now = OffsetDateTime::now_utc().unix_timestamp();
            if let Err(e) = self.prune_once(now).await {
                error!("Pruning failed, will retry next cycle: {}", e);
            }
        }

        info!("Pruner stopped");
    }
}
