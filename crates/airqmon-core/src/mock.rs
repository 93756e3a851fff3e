//! Mock sensor and notifier for testing.
//!
//! [`MockSensor`] implements [`SensorProvider`] with scripted readings,
//! failure injection and simulated latency. [`RecordingNotifier`] implements
//! [`Notifier`] and keeps every message it was asked to deliver.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use airqmon_types::Sample;

use crate::error::{Error, Result};
use crate::notify::{AlertMessage, DeliveryReport, Notifier};
use crate::sensor::SensorProvider;

/// A mock sensor for testing.
///
/// Scripted readings queued with [`MockSensor::push_reading`] are returned
/// first, in order; after that the default reading is repeated.
///
/// ```
/// use airqmon_core::{MockSensor, SensorProvider};
/// use airqmon_types::Sample;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let sensor = MockSensor::new(Sample::new(450.0, 21.0, 40.0));
/// sensor.push_reading(Sample::new(1600.0, 21.0, 40.0)).await;
///
/// assert_eq!(sensor.sample().await.unwrap().co2, 1600.0);
/// assert_eq!(sensor.sample().await.unwrap().co2, 450.0);
/// # }
/// ```
#[derive(Debug)]
pub struct MockSensor {
    default_reading: RwLock<Sample>,
    script: RwLock<VecDeque<Sample>>,
    should_fail: AtomicBool,
    fail_message: RwLock<String>,
    /// Simulated read latency in milliseconds (0 = no delay).
    read_latency_ms: AtomicU64,
    /// Number of reads to fail before succeeding again.
    remaining_failures: AtomicU32,
    read_count: AtomicU32,
}

impl MockSensor {
    /// Create a mock sensor that returns `reading` by default.
    pub fn new(reading: Sample) -> Self {
        Self {
            default_reading: RwLock::new(reading),
            script: RwLock::new(VecDeque::new()),
            should_fail: AtomicBool::new(false),
            fail_message: RwLock::new("Mock failure".to_string()),
            read_latency_ms: AtomicU64::new(0),
            remaining_failures: AtomicU32::new(0),
            read_count: AtomicU32::new(0),
        }
    }

    /// Queue a reading to be returned before the default one.
    pub async fn push_reading(&self, reading: Sample) {
        self.script.write().await.push_back(reading);
    }

    /// Replace the default reading.
    pub async fn set_reading(&self, reading: Sample) {
        *self.default_reading.write().await = reading;
    }

    /// Make every read fail (or succeed again).
    ///
    /// Uses `try_write` so it can be called from synchronous test setup;
    /// the message is only replaced when the lock is free.
    pub fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::Relaxed);
        if let Some(msg) = message
            && let Ok(mut guard) = self.fail_message.try_write()
        {
            *guard = msg.to_string();
        }
    }

    /// Fail the next `count` reads, then recover.
    pub fn fail_next(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Delay every read by `latency`.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of reads attempted so far (successful or not).
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    fn take_failure(&self) -> bool {
        if self.should_fail.load(Ordering::Relaxed) {
            return true;
        }
        self.remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SensorProvider for MockSensor {
    async fn sample(&self) -> Result<Sample> {
        self.read_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.read_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.take_failure() {
            let msg = self.fail_message.read().await.clone();
            return Err(Error::SensorUnavailable(msg));
        }

        if let Some(reading) = self.script.write().await.pop_front() {
            return Ok(reading);
        }
        Ok(*self.default_reading.read().await)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A notifier that records messages instead of delivering them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<(Option<String>, AlertMessage)>>,
    should_fail: AtomicBool,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make delivery fail. Failed deliveries are still recorded.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// All messages received so far, with their topics.
    pub async fn sent(&self) -> Vec<(Option<String>, AlertMessage)> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, topic: Option<&str>, message: &AlertMessage) -> Result<DeliveryReport> {
        self.sent
            .write()
            .await
            .push((topic.map(str::to_string), message.clone()));

        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::Delivery("recording notifier set to fail".to_string()));
        }
        Ok(DeliveryReport::single(true))
    }

    fn name(&self) -> &str {
        "recording"
    }
}
