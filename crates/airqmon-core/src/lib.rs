//! Sensor, notification and alerting logic for AirQMon.
//!
//! This crate holds everything the service loops need that does not touch
//! the database:
//!
//! - **Sensors**: the [`SensorProvider`] trait, the [`Simulator`], an
//!   external [`CommandSensor`] and the [`FallbackSensor`] wrapper
//! - **Notifiers**: the [`Notifier`] trait with [`LogNotifier`],
//!   [`NtfyNotifier`] and the subscription fan-out [`WebhookNotifier`]
//! - **Alerting**: the pure CO2 hysteresis machine in [`alert`]
//!
//! Slow collaborators are always called through [`sample_within`] and
//! [`notify_within`], which bound them with a timeout.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use airqmon_core::{LogNotifier, Simulator, alert, notify_within, sample_within};
//! use airqmon_types::{AlertConfig, AlertState, Measurement};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> airqmon_core::Result<()> {
//! let sample = sample_within(&Simulator::new(), Duration::from_secs(5)).await?;
//! let row = Measurement { id: 1, ts: 1_000, co2: 1800.0, temperature: sample.temperature, humidity: sample.humidity };
//!
//! let config = AlertConfig::default();
//! if let Some(eval) = alert::evaluate(&AlertState::default(), &config, &[row], 1_000)
//!     && let Some(message) = eval.message(&config)
//! {
//!     notify_within(&LogNotifier, None, &message, Duration::from_secs(10)).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod error;
pub mod mock;
pub mod notify;
pub mod sensor;

pub use alert::{AlertPhase, Evaluation, Transition, evaluate};
pub use error::{Error, Result};
pub use mock::{MockSensor, RecordingNotifier};
pub use notify::{
    AlertKind, AlertMessage, DeliveryReport, LogNotifier, Notifier, NtfyNotifier, Subscriptions,
    WebhookNotifier, notify_within,
};
pub use sensor::{
    CommandSensor, FallbackSensor, SIM_CO2_MAX, SIM_CO2_MIN, SIM_CO2_STEP, SensorProvider,
    Simulator, parse_reading, sample_within,
};

pub use airqmon_types::{AlertConfig, AlertState, Measurement, PushSubscription, Sample};
