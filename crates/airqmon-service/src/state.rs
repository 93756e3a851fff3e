//! Application state shared across the loops and HTTP handlers.
//!
//! The [`Store`] is the only shared mutable resource. It sits behind an
//! async mutex so that one writer runs at a time within the process; other
//! processes opening the same file are serialised by SQLite itself.
//!
//! All background loops watch the same stop channel. A stop request is only
//! observed between cycles; an in-flight sensor read or notification is
//! never cancelled half-way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};

use airqmon_core::Notifier;
use airqmon_store::Store;

use crate::config::Config;
use crate::notifiers::build_notifier;

/// The store, shareable with notifiers that read subscriptions.
pub type SharedStore = Arc<Mutex<Store>>;

/// Shared application state.
pub struct AppState {
    /// The data store.
    pub store: SharedStore,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
    /// Notification sink used by the alerter and the test endpoint.
    pub notifier: Arc<dyn Notifier>,
    /// Collector status and statistics.
    pub collector: CollectorState,
    started_at: OffsetDateTime,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl AppState {
    /// Create application state with the notifier selected in `config.notify`.
    ///
    /// # Errors
    ///
    /// Fails if the notifier's HTTP client cannot be built.
    pub fn new(store: Store, config: Config) -> airqmon_core::Result<Arc<Self>> {
        let store = Arc::new(Mutex::new(store));
        let notifier = build_notifier(&config.notify, Arc::clone(&store))?;
        Ok(Self::from_parts(store, config, notifier))
    }

    /// Create application state with an explicit notifier.
    pub fn with_notifier(store: Store, config: Config, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Self::from_parts(Arc::new(Mutex::new(store)), config, notifier)
    }

    fn from_parts(store: SharedStore, config: Config, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            config: RwLock::new(config),
            notifier,
            collector: CollectorState::new(),
            started_at: OffsetDateTime::now_utc(),
            stop_tx,
            stop_rx,
        })
    }

    /// When this process started.
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal all background loops to stop after their current cycle.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
        self.collector.set_running(false);
    }

    /// Whether a stop was requested.
    pub fn is_stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }
}

/// State for tracking the collector.
pub struct CollectorState {
    /// Whether the collector is currently running.
    running: AtomicBool,
    /// When the collector was started (Unix timestamp).
    started_at: AtomicU64,
    /// Collection statistics.
    pub stats: RwLock<CollectionStats>,
}

impl CollectorState {
    /// Create a new collector state.
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            stats: RwLock::new(CollectionStats::default()),
        }
    }

    /// Check if the collector is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the collector as started or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    /// Get the collector start time.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Sampling statistics reported on `/api/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStats {
    /// Name of the sensor provider.
    pub sensor: Option<String>,
    /// Sampling interval in seconds.
    pub interval_secs: u64,
    /// Time of the last stored sample.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sample_at: Option<OffsetDateTime>,
    /// Time of the last failed cycle.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Total stored samples.
    pub success_count: u64,
    /// Total skipped cycles.
    pub failure_count: u64,
}

impl CollectionStats {
    /// Record a stored sample.
    pub fn record_success(&mut self, at: OffsetDateTime) {
        self.success_count += 1;
        self.last_sample_at = Some(at);
    }

    /// Record a skipped cycle.
    pub fn record_failure(&mut self, at: OffsetDateTime, error: impl Into<String>) {
        self.failure_count += 1;
        self.last_error_at = Some(at);
        self.last_error = Some(error.into());
    }
}
