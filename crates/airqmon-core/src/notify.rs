//! Notification sinks.
//!
//! The alert engine talks to a [`Notifier`]; delivery is best-effort and a
//! failure never stops the engine from persisting its state. Three sinks
//! are provided:
//!
//! - [`LogNotifier`] writes the message to the log (the default)
//! - [`NtfyNotifier`] publishes to an ntfy topic over HTTP
//! - [`WebhookNotifier`] POSTs the message as JSON to every registered
//!   [`PushSubscription`], pruning endpoints that report they are gone

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use airqmon_types::{Measurement, PushSubscription, is_valid_topic};

use crate::error::{Error, Result};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    /// CO2 crossed the high threshold.
    #[serde(rename = "co2_high")]
    High,
    /// CO2 fell back to the clear threshold.
    #[serde(rename = "co2_recovery")]
    Recovered,
    /// Operator-triggered test message.
    #[serde(rename = "test")]
    Test,
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    /// Notification type.
    #[serde(rename = "type")]
    pub kind: AlertKind,
    /// Short title.
    pub title: String,
    /// Human-readable body.
    pub body: String,
    /// Unix seconds of the measurement that caused the notification.
    pub ts: i64,
    /// Dashboard link relative to the server root.
    pub url: String,
}

impl AlertMessage {
    /// Message for a high-CO2 crossing caused by `reading`.
    pub fn high(reading: &Measurement, co2_high: i64) -> Self {
        Self {
            kind: AlertKind::High,
            title: "AirQMon: High CO2 Alert".to_string(),
            body: format!(
                "CO2 is high: {:.0} ppm (threshold {} ppm). Temp {:.1} C, humidity {:.1}%.",
                reading.co2, co2_high, reading.temperature, reading.humidity
            ),
            ts: reading.ts,
            url: "/".to_string(),
        }
    }

    /// Message for a recovery confirmed by `reading`.
    pub fn recovered(reading: &Measurement, co2_clear: i64) -> Self {
        Self {
            kind: AlertKind::Recovered,
            title: "AirQMon: CO2 Normalized".to_string(),
            body: format!(
                "CO2 is back to normal: {:.0} ppm (clear threshold {} ppm). Temp {:.1} C, humidity {:.1}%.",
                reading.co2, co2_clear, reading.temperature, reading.humidity
            ),
            ts: reading.ts,
            url: "/".to_string(),
        }
    }

    /// Message used to check that a sink is reachable.
    pub fn test_notification(ts: i64) -> Self {
        Self {
            kind: AlertKind::Test,
            title: "AirQMon: Test Notification".to_string(),
            body: "Notifications are working.".to_string(),
            ts,
            url: "/".to_string(),
        }
    }
}

/// Outcome of one delivery attempt across all recipients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Recipients a delivery was attempted to.
    pub attempted: usize,
    /// Recipients that accepted the message.
    pub sent: usize,
    /// Recipients removed because they no longer exist.
    pub removed: usize,
}

impl DeliveryReport {
    /// Report for a sink with exactly one recipient.
    pub fn single(sent: bool) -> Self {
        Self {
            attempted: 1,
            sent: usize::from(sent),
            removed: 0,
        }
    }

    /// Whether recipients remain after stale ones were removed.
    pub fn has_remaining_recipients(&self) -> bool {
        self.attempted > self.removed
    }
}

/// A notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`, addressed to `topic` when the sink uses topics.
    async fn notify(&self, topic: Option<&str>, message: &AlertMessage) -> Result<DeliveryReport>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for std::sync::Arc<T> {
    async fn notify(&self, topic: Option<&str>, message: &AlertMessage) -> Result<DeliveryReport> {
        (**self).notify(topic, message).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Deliver through `notifier`, giving up after `limit`.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if the sink hangs, or the sink's own error.
pub async fn notify_within<N: Notifier + ?Sized>(
    notifier: &N,
    topic: Option<&str>,
    message: &AlertMessage,
    limit: Duration,
) -> Result<DeliveryReport> {
    tokio::time::timeout(limit, notifier.notify(topic, message))
        .await
        .map_err(|_| Error::Timeout {
            operation: "notification",
            duration: limit,
        })?
}

/// Registry of notification destinations.
#[async_trait]
pub trait Subscriptions: Send + Sync {
    /// Register (or refresh) a destination.
    async fn subscribe(&self, subscription: PushSubscription) -> Result<()>;

    /// Remove a destination. Returns `false` if it was not registered.
    async fn unsubscribe(&self, endpoint: &str) -> Result<bool>;

    /// All registered destinations.
    async fn list(&self) -> Result<Vec<PushSubscription>>;
}

// ==========================================================================
// Log
// ==========================================================================

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, topic: Option<&str>, message: &AlertMessage) -> Result<DeliveryReport> {
        info!(
            kind = ?message.kind,
            topic = topic.unwrap_or("-"),
            ts = message.ts,
            "{}: {}",
            message.title,
            message.body
        );
        Ok(DeliveryReport::single(true))
    }

    fn name(&self) -> &str {
        "log"
    }
}

// ==========================================================================
// ntfy
// ==========================================================================

/// Publishes notifications to an ntfy server.
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    client: reqwest::Client,
    server: String,
}

impl NtfyNotifier {
    /// Create a notifier for `server` (e.g. `https://ntfy.sh`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(server: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    fn publish_url(&self, topic: &str) -> String {
        format!("{}/{}", self.server, topic)
    }
}

fn ntfy_tags(kind: AlertKind) -> (&'static str, &'static str) {
    match kind {
        AlertKind::High => ("warning", "high"),
        AlertKind::Recovered => ("white_check_mark", "default"),
        AlertKind::Test => ("bell", "low"),
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn notify(&self, topic: Option<&str>, message: &AlertMessage) -> Result<DeliveryReport> {
        let topic = topic
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::NotConfigured("no notification topic set".to_string()))?;
        if !is_valid_topic(topic) {
            return Err(Error::NotConfigured(format!(
                "invalid notification topic '{topic}'"
            )));
        }

        let (tags, priority) = ntfy_tags(message.kind);
        let response = self
            .client
            .post(self.publish_url(topic))
            .header("Title", &message.title)
            .header("Tags", tags)
            .header("Priority", priority)
            .body(message.body.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Delivery(format!(
                "ntfy answered {} for topic {}",
                status, topic
            )));
        }

        debug!("Published {:?} notification to ntfy topic {}", message.kind, topic);
        Ok(DeliveryReport::single(true))
    }

    fn name(&self) -> &str {
        "ntfy"
    }
}

// ==========================================================================
// Webhook fan-out
// ==========================================================================

/// POSTs notifications as JSON to every registered subscription.
pub struct WebhookNotifier<S> {
    client: reqwest::Client,
    subscriptions: S,
}

impl<S: Subscriptions> WebhookNotifier<S> {
    /// Create a notifier delivering to the endpoints in `subscriptions`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(subscriptions: S, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            subscriptions,
        })
    }
}

#[async_trait]
impl<S: Subscriptions> Notifier for WebhookNotifier<S> {
    async fn notify(&self, _topic: Option<&str>, message: &AlertMessage) -> Result<DeliveryReport> {
        let recipients = self.subscriptions.list().await?;
        let mut report = DeliveryReport {
            attempted: recipients.len(),
            ..DeliveryReport::default()
        };

        if recipients.is_empty() {
            debug!("No subscriptions registered, nothing to deliver");
            return Ok(report);
        }

        for subscription in &recipients {
            let outcome = self
                .client
                .post(&subscription.endpoint)
                .json(message)
                .send()
                .await;

            match outcome {
                Ok(response) if response.status().is_success() => report.sent += 1,
                Ok(response)
                    if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) =>
                {
                    info!(
                        "Removing expired subscription {} ({})",
                        subscription.endpoint,
                        response.status()
                    );
                    if let Err(e) = self.subscriptions.unsubscribe(&subscription.endpoint).await {
                        warn!("Failed to remove subscription {}: {}", subscription.endpoint, e);
                    } else {
                        report.removed += 1;
                    }
                }
                Ok(response) => warn!(
                    "Delivery to {} failed with status {}",
                    subscription.endpoint,
                    response.status()
                ),
                Err(e) => warn!("Delivery to {} failed: {}", subscription.endpoint, e),
            }
        }

        if report.sent == 0 && report.has_remaining_recipients() {
            return Err(Error::Delivery(format!(
                "all {} deliveries failed",
                report.attempted - report.removed
            )));
        }
        Ok(report)
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
