//! Background sampling loop.
//!
//! Every tick the sensor is read under a timeout and the sample is appended
//! with the current time. A failed or timed-out read skips the tick; no
//! placeholder row is written. Ticks follow a fixed schedule and missed
//! ticks are skipped, so a slow read never makes later samples bunch up.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use airqmon_core::{CommandSensor, FallbackSensor, SensorProvider, Simulator, sample_within};
use airqmon_types::Measurement;

use crate::config::CollectorConfig;
use crate::state::AppState;

/// Number of consecutive failures logged as warnings before going quiet.
const WARN_FAILURES: u32 = 3;

/// Build the sensor provider described by `config`.
///
/// With a `sensor_command` the external driver is used and the simulator
/// fills in whenever it fails; without one the simulator is used directly.
///
/// # Errors
///
/// Fails if the command line is blank.
pub fn build_sensor(config: &CollectorConfig) -> airqmon_core::Result<Arc<dyn SensorProvider>> {
    match config.sensor_command.as_deref() {
        Some(command) => {
            let sensor = CommandSensor::from_command_line(command)?;
            info!("Reading sensor through '{}' with simulator fallback", command);
            Ok(Arc::new(FallbackSensor::new(sensor)))
        }
        None => {
            info!("No sensor command configured, using simulator");
            Ok(Arc::new(Simulator::new()))
        }
    }
}

/// Background collector that samples the sensor on a fixed interval.
pub struct Collector {
    state: Arc<AppState>,
    sensor: Arc<dyn SensorProvider>,
}

impl Collector {
    /// Create a new collector.
    pub fn new(state: Arc<AppState>, sensor: Arc<dyn SensorProvider>) -> Self {
        Self { state, sensor }
    }

    /// Take one sample and store it.
    pub async fn collect_once(&self) -> Result<Measurement, CollectorError> {
        let timeout = self.state.config.read().await.collector.sensor_timeout();

        let sample = sample_within(self.sensor.as_ref(), timeout)
            .await
            .map_err(CollectorError::Sensor)?;

        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let store = self.state.store.lock().await;
        store.append(&sample, ts).map_err(CollectorError::Store)
    }

    /// Start sampling in the background.
    ///
    /// Returns immediately; the loop runs until the stop signal is raised.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run the sampling loop until the stop signal is raised.
    pub async fn run(self) {
        let interval_secs = self.state.config.read().await.collector.interval_secs;
        let mut stop_rx = self.state.subscribe_stop();

        {
            let mut stats = self.state.collector.stats.write().await;
            stats.sensor = Some(self.sensor.name().to_string());
            stats.interval_secs = interval_secs;
        }
        self.state.collector.set_running(true);
        info!(
            "Starting collector (sensor: {}, interval: {}s)",
            self.sensor.name(),
            interval_secs
        );

        let mut timer = interval(Duration::from_secs(interval_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = stop_rx.changed() => {}
            }
            if *stop_rx.borrow() {
                break;
            }

            match self.collect_once().await {
                Ok(measurement) => {
                    if consecutive_failures > WARN_FAILURES {
                        info!(
                            "Sensor recovered after {} failed reads",
                            consecutive_failures
                        );
                    }
                    consecutive_failures = 0;
                    debug!("Stored {}", measurement);
                    self.state
                        .collector
                        .stats
                        .write()
                        .await
                        .record_success(OffsetDateTime::now_utc());
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures <= WARN_FAILURES {
                        warn!("Skipping sample: {} (attempt {})", e, consecutive_failures);
                    } else if consecutive_failures == WARN_FAILURES + 1 {
                        error!(
                            "Sampling failed {} times in a row, will continue trying silently",
                            consecutive_failures
                        );
                    }
                    self.state
                        .collector
                        .stats
                        .write()
                        .await
                        .record_failure(OffsetDateTime::now_utc(), e.to_string());
                }
            }
        }

        self.state.collector.set_running(false);
        info!("Collector stopped");
    }
}

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to read sensor: {0}")]
    Sensor(airqmon_core::Error),
    #[error("Failed to store sample: {0}")]
    Store(airqmon_store::Error),
}
