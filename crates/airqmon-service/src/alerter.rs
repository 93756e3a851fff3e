//! Alert polling loop.
//!
//! Each cycle reads the measurements appended since the last processed id,
//! runs them through [`airqmon_core::evaluate`], sends the resulting
//! notification (if any) and then persists the new state. The store lock is
//! released while the notification is in flight.
//!
//! Delivery is at-least-once: a crash between the send and the save repeats
//! the notification on restart, a crash before the send redoes the decision.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use airqmon_core::{Evaluation, Transition, evaluate, notify_within};
use airqmon_types::ValidationError;

use crate::state::AppState;

/// Background task driving the alert state machine.
pub struct Alerter {
    state: Arc<AppState>,
}

impl Alerter {
    /// Create a new alerter.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Run one poll cycle at wall-clock time `now` (Unix seconds).
    ///
    /// Returns `None` when no new measurements arrived. A failed delivery is
    /// logged and does not prevent the state from being saved.
    ///
    /// # Errors
    ///
    /// Fails without advancing the state if the stored alert configuration
    /// is invalid or the store cannot be read or written.
    pub async fn poll_once(&self, now: i64) -> Result<Option<Evaluation>, AlerterError> {
        let (config, current, batch) = {
            let store = self.state.store.lock().await;
            let config = store.alert_config()?;
            config.validate()?;
            let current = store.alert_state()?;
            let batch = store.range_since(current.last_seen_id)?;
            (config, current, batch)
        };

        let Some(evaluation) = evaluate(&current, &config, &batch, now) else {
            debug!("No new measurements after id {}", current.last_seen_id);
            return Ok(None);
        };

        match (evaluation.transition, evaluation.trigger.as_ref()) {
            (Transition::Raised, Some(trigger)) => info!(
                id = trigger.id,
                co2 = trigger.co2,
                ts = trigger.ts,
                in_alert = true,
                "High CO2 alert raised"
            ),
            (Transition::Recovered, Some(trigger)) => info!(
                id = trigger.id,
                co2 = trigger.co2,
                ts = trigger.ts,
                in_alert = false,
                "CO2 back to normal"
            ),
            (Transition::Suppressed, _) => info!(
                last_seen_id = evaluation.state.last_seen_id,
                in_alert = false,
                "High CO2 inside cooldown, not notifying"
            ),
            _ => debug!(
                last_seen_id = evaluation.state.last_seen_id,
                in_alert = evaluation.state.in_alert,
                "Processed {} measurement(s)",
                batch.len()
            ),
        }

        if let Some(message) = evaluation.message(&config) {
            let limit = self.state.config.read().await.notify.timeout();
            let topic = config.notification_topic.as_deref();
            match notify_within(self.state.notifier.as_ref(), topic, &message, limit).await {
                Ok(report) => info!(
                    "Sent '{}' via {} ({}/{} delivered, {} removed)",
                    message.title,
                    self.state.notifier.name(),
                    report.sent,
                    report.attempted,
                    report.removed
                ),
                Err(e) => warn!("Failed to deliver '{}': {}", message.title, e),
            }
        }

        self.state
            .store
            .lock()
            .await
            .save_alert_state(&evaluation.state)?;

        Ok(Some(evaluation))
    }

    /// Start polling in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run the polling loop until the stop signal is raised.
    pub async fn run(self) {
        let every = self.state.config.read().await.alerter.poll_interval();
        let mut stop_rx = self.state.subscribe_stop();
        info!(
            "Starting alerter (every {}s, notifier: {})",
            every.as_secs(),
            self.state.notifier.name()
        );

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
            match self.poll_once(now).await {
                Ok(_) => {}
                Err(AlerterError::InvalidConfig(e)) => {
                    error!("Stored alert configuration is invalid, skipping cycle: {}", e)
                }
                Err(e) => error!("Alert cycle failed, will retry: {}", e),
            }
        }

        info!("Alerter stopped");
    }
}

/// Alerter errors.
#[derive(Debug, thiserror::Error)]
pub enum AlerterError {
    #[error("Invalid alert configuration: {0}")]
    InvalidConfig(#[from] ValidationError),
    #[error("Store error: {0}")]
    Store(#[from] airqmon_store::Error),
}
