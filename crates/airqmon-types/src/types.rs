//! Core data types for the air-quality time series and alert bookkeeping.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ValidationError;

/// Default CO2 level (ppm) at or above which a high alert fires.
pub const DEFAULT_CO2_HIGH: i64 = 1500;
/// Default CO2 level (ppm) at or below which an alert clears.
pub const DEFAULT_CO2_CLEAR: i64 = 500;
/// Default minimum time between two high-alert episodes, in seconds.
pub const DEFAULT_COOLDOWN_SECONDS: i64 = 1800;

/// Prefix used for generated notification topics.
pub const TOPIC_PREFIX: &str = "airqmon-";

/// A single reading returned by a sensor provider, before it is stored.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// CO2 concentration in ppm.
    pub co2: f64,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

impl Sample {
    /// Create a sample from raw values.
    #[must_use]
    pub fn new(co2: f64, temperature: f64, humidity: f64) -> Self {
        Self {
            co2,
            temperature,
            humidity,
        }
    }

    /// Whether every value is a finite number.
    ///
    /// Providers occasionally report NaN while a sensor warms up; such
    /// samples are treated as failed reads rather than stored.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.co2.is_finite() && self.temperature.is_finite() && self.humidity.is_finite()
    }
}

/// A stored measurement.
///
/// Measurements are immutable once written. The `id` is assigned by the
/// store, is strictly increasing and is never reused.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    /// Store-assigned row id (ordering key).
    pub id: i64,
    /// Capture time as Unix seconds.
    pub ts: i64,
    /// CO2 concentration in ppm.
    pub co2: f64,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

impl Measurement {
    /// Capture time as an [`OffsetDateTime`], if the timestamp is in range.
    #[must_use]
    pub fn captured_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.ts).ok()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} @{} co2={:.0}ppm temp={:.1}C hum={:.1}%",
            self.id, self.ts, self.co2, self.temperature, self.humidity
        )
    }
}

/// Persistent state of the alert engine (a singleton).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlertState {
    /// Highest measurement id already processed.
    pub last_seen_id: i64,
    /// True while CO2 is high and recovery has not been confirmed.
    pub in_alert: bool,
    /// Unix seconds when the most recent alert episode started.
    pub last_alert_ts: Option<i64>,
}

impl AlertState {
    /// Initial state for a store whose highest measurement id is `max_id`.
    ///
    /// Starting at the current head means history recorded before the
    /// alerter first ran never triggers notifications.
    #[must_use]
    pub fn starting_at(max_id: i64) -> Self {
        Self {
            last_seen_id: max_id,
            ..Self::default()
        }
    }

    /// Whether a new alert episode may start at `now` given `cooldown_seconds`.
    #[must_use]
    pub fn cooldown_elapsed(&self, now: i64, cooldown_seconds: i64) -> bool {
        match self.last_alert_ts {
            None => true,
            Some(started) => now.saturating_sub(started) >= cooldown_seconds,
        }
    }
}

/// Runtime-adjustable alert configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlertConfig {
    /// Topic passed to the notification sink, if any.
    pub notification_topic: Option<String>,
    /// CO2 level (ppm) at or above which a high alert fires.
    pub co2_high: i64,
    /// CO2 level (ppm) at or below which an alert clears.
    pub co2_clear: i64,
    /// Minimum seconds between the starts of two alert episodes.
    pub cooldown_seconds: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            notification_topic: None,
            co2_high: DEFAULT_CO2_HIGH,
            co2_clear: DEFAULT_CO2_CLEAR,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
        }
    }
}

impl AlertConfig {
    /// Check the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule:
    /// - `co2_high` must be positive
    /// - `co2_clear` must not be negative
    /// - `co2_clear` must be lower than `co2_high`
    /// - `cooldown_seconds` must not be negative
    /// - a topic, when present, must not be blank and must be at most
    ///   [`MAX_TOPIC_LEN`] characters of `A-Z a-z 0-9 - _`
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.co2_high <= 0 {
            return Err(ValidationError::new("co2_high", "must be greater than 0"));
        }
        if self.co2_clear < 0 {
            return Err(ValidationError::new("co2_clear", "must be >= 0"));
        }
        if self.co2_clear >= self.co2_high {
            return Err(ValidationError::new(
                "co2_clear",
                format!(
                    "must be lower than co2_high ({} >= {})",
                    self.co2_clear, self.co2_high
                ),
            ));
        }
        if self.cooldown_seconds < 0 {
            return Err(ValidationError::new("cooldown_seconds", "must be >= 0"));
        }
        if let Some(topic) = &self.notification_topic
            && topic.trim().is_empty()
        {
            return Err(ValidationError::new(
                "notification_topic",
                "must not be empty (omit it instead)",
            ));
        }
        if let Some(topic) = &self.notification_topic
            && !is_valid_topic(topic.trim())
        {
            return Err(ValidationError::new(
                "notification_topic",
                format!("must be 1-{MAX_TOPIC_LEN} characters of A-Z, a-z, 0-9, '-' or '_'"),
            ));
        }
        Ok(())
    }
}

/// Longest accepted notification topic.
pub const MAX_TOPIC_LEN: usize = 64;

/// `[-_A-Za-z0-9]{1,MAX_TOPIC_LEN}`; the topic is used verbatim as a URL path segment.
#[must_use]
pub fn is_valid_topic(topic: &str) -> bool {
    (1..=MAX_TOPIC_LEN).contains(&topic.len())
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Generate a hard-to-guess notification topic.
#[must_use]
pub fn generate_topic() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{TOPIC_PREFIX}{}", &id[..12])
}

/// A registered notification destination.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PushSubscription {
    /// Delivery endpoint URL (unique key).
    pub endpoint: String,
    /// Client public key, for push services that encrypt payloads.
    #[cfg_attr(feature = "serde", serde(default))]
    pub p256dh: Option<String>,
    /// Client auth secret, for push services that encrypt payloads.
    #[cfg_attr(feature = "serde", serde(default))]
    pub auth: Option<String>,
    /// Unix seconds when the subscription was registered.
    #[cfg_attr(feature = "serde", serde(default))]
    pub created_at: i64,
}

impl PushSubscription {
    /// Create a subscription for a bare endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            p256dh: None,
            auth: None,
            created_at: 0,
        }
    }

    /// Check that the endpoint looks like an HTTP(S) URL.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for blank or non-HTTP endpoints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ValidationError::new("endpoint", "must not be empty"));
        }
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ValidationError::new(
                "endpoint",
                format!("'{endpoint}' is not an http(s) URL"),
            ));
        }
        Ok(())
    }
}
