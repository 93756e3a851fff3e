//! Error types for airqmon-core.
//!
//! Every error here is recovered locally by its caller:
//!
//! | Error | Raised by | Recovery |
//! |-------|-----------|----------|
//! | [`Error::SensorUnavailable`] | sensor providers | skip this sampling cycle |
//! | [`Error::Timeout`] | [`crate::sample_within`], [`crate::notify_within`] | skip / log, retry next tick |
//! | [`Error::Delivery`] | notifiers | log; never blocks alert state persistence |
//! | [`Error::NotConfigured`] | notifiers | log; fix configuration |
//! | [`Error::Subscriptions`] | subscription registries | log; treated as a delivery failure |
//! | [`Error::Http`] | HTTP notifiers | log; retried with the next transition |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in airqmon-core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The sensor could not produce a reading.
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// An operation did not complete within its time limit.
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The limit that was exceeded.
        duration: Duration,
    },

    /// A notification could not be delivered.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    /// A notifier is missing required configuration.
    #[error("Notifier not configured: {0}")]
    NotConfigured(String),

    /// The subscription registry could not be read or updated.
    #[error("Subscription registry error: {0}")]
    Subscriptions(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error (e.g. spawning a sensor command).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for airqmon-core operations.
pub type Result<T> = std::result::Result<T, Error>;
