//! Sensor providers.
//!
//! The collector only ever sees the [`SensorProvider`] trait: a call either
//! yields a valid [`Sample`] or an error. Whether a physical sensor, an
//! external driver command or the [`Simulator`] produced the sample is
//! invisible to it.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use airqmon_core::{Simulator, sample_within};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> airqmon_core::Result<()> {
//! let sensor = Simulator::new();
//! let sample = sample_within(&sensor, Duration::from_secs(5)).await?;
//! assert!(sample.co2 >= 400.0);
//! # Ok(())
//! # }
//! ```

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use airqmon_types::Sample;

use crate::error::{Error, Result};

/// Something that can be asked for one reading.
#[async_trait]
pub trait SensorProvider: Send + Sync {
    /// Take one reading.
    async fn sample(&self) -> Result<Sample>;

    /// Short human-readable name used in logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: SensorProvider + ?Sized> SensorProvider for std::sync::Arc<T> {
    async fn sample(&self) -> Result<Sample> {
        (**self).sample().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Take one reading from `provider`, giving up after `limit`.
///
/// Non-finite values are reported as [`Error::SensorUnavailable`] so that a
/// half-initialised sensor never produces a stored row.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if the provider hangs, or the provider's own
/// error.
pub async fn sample_within<P: SensorProvider + ?Sized>(
    provider: &P,
    limit: Duration,
) -> Result<Sample> {
    let sample = tokio::time::timeout(limit, provider.sample())
        .await
        .map_err(|_| Error::Timeout {
            operation: "sensor read",
            duration: limit,
        })??;

    if !sample.is_finite() {
        return Err(Error::SensorUnavailable(format!(
            "{} returned non-finite values",
            provider.name()
        )));
    }
    Ok(sample)
}

// ==========================================================================
// Simulator
// ==========================================================================

/// Lowest simulated CO2 level (ppm).
pub const SIM_CO2_MIN: f64 = 400.0;
/// Highest simulated CO2 level (ppm).
pub const SIM_CO2_MAX: f64 = 2000.0;
/// CO2 change per simulated reading (ppm).
pub const SIM_CO2_STEP: f64 = 100.0;

#[derive(Debug)]
struct Wave {
    co2: f64,
    rising: bool,
}

impl Wave {
    /// Return the current level and move one step along the triangle wave.
    fn advance(&mut self) -> f64 {
        let current = self.co2;
        if self.rising {
            self.co2 += SIM_CO2_STEP;
            if self.co2 >= SIM_CO2_MAX {
                self.co2 = SIM_CO2_MAX;
                self.rising = false;
            }
        } else {
            self.co2 -= SIM_CO2_STEP;
            if self.co2 <= SIM_CO2_MIN {
                self.co2 = SIM_CO2_MIN;
                self.rising = true;
            }
        }
        current
    }
}

/// Synthetic sensor for development and for hosts without hardware.
///
/// CO2 sweeps a triangle wave between 400 and 2000 ppm in 100 ppm steps,
/// so every alert transition is exercised within a few minutes. Temperature
/// and humidity jitter around 22 °C and 45 %.
#[derive(Debug)]
pub struct Simulator {
    wave: Mutex<Wave>,
}

impl Simulator {
    /// Create a simulator starting at the bottom of the wave.
    pub fn new() -> Self {
        Self {
            wave: Mutex::new(Wave {
                co2: SIM_CO2_MIN,
                rising: true,
            }),
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn jitter(center: f64, spread: f64) -> f64 {
    center + rand::rng().random_range(-spread..=spread)
}

#[async_trait]
impl SensorProvider for Simulator {
    async fn sample(&self) -> Result<Sample> {
        let co2 = self.wave.lock().await.advance();
        Ok(Sample::new(
            round_to(co2, 1),
            round_to(jitter(22.0, 1.5), 2),
            round_to(jitter(45.0, 3.0), 2),
        ))
    }

    fn name(&self) -> &str {
        "simulator"
    }
}

// ==========================================================================
// External driver command
// ==========================================================================

/// Reads the sensor by running an external driver program.
///
/// The program must print `co2 temperature humidity` on stdout, separated
/// by whitespace or commas (e.g. `812,22.4,45.1`). A non-zero exit status or
/// unparsable output is a failed read.
#[derive(Debug, Clone)]
pub struct CommandSensor {
    program: String,
    args: Vec<String>,
}

impl CommandSensor {
    /// Create a sensor from a shell-style command line (split on whitespace).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] if the command line is blank.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::NotConfigured("empty sensor command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// Parse driver output of the form `co2 temperature humidity`.
///
/// # Errors
///
/// Returns [`Error::SensorUnavailable`] unless at least three numbers are
/// present.
pub fn parse_reading(output: &str) -> Result<Sample> {
    let values = output
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .take(3)
        .map(str::parse::<f64>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::SensorUnavailable(format!("unparsable reading '{}': {e}", output.trim())))?;

    match values.as_slice() {
        [co2, temperature, humidity] => Ok(Sample::new(*co2, *temperature, *humidity)),
        _ => Err(Error::SensorUnavailable(format!(
            "expected 3 values, got '{}'",
            output.trim()
        ))),
    }
}

#[async_trait]
impl SensorProvider for CommandSensor {
    async fn sample(&self) -> Result<Sample> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::SensorUnavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_reading(&String::from_utf8_lossy(&output.stdout))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

// ==========================================================================
// Fallback
// ==========================================================================

/// Uses a primary provider and substitutes simulated readings when it fails.
///
/// The substitution is logged at debug level only; callers always receive
/// a valid reading.
pub struct FallbackSensor<P> {
    primary: P,
    simulator: Simulator,
}

impl<P: SensorProvider> FallbackSensor<P> {
    /// Wrap `primary` with a simulator fallback.
    pub fn new(primary: P) -> Self {
        Self {
            primary,
            simulator: Simulator::new(),
        }
    }
}

#[async_trait]
impl<P: SensorProvider> SensorProvider for FallbackSensor<P> {
    async fn sample(&self) -> Result<Sample> {
        match self.primary.sample().await {
            Ok(sample) if sample.is_finite() => Ok(sample),
            Ok(_) => {
                debug!("{} returned non-finite values, using simulator", self.primary.name());
                self.simulator.sample().await
            }
            Err(e) => {
                debug!("{} failed ({}), using simulator", self.primary.name(), e);
                self.simulator.sample().await
            }
        }
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}
