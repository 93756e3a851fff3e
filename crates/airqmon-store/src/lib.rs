//! Local persistence for AirQMon.
//!
//! This crate keeps everything AirQMon stores in a single SQLite file:
//!
//! - the append-only measurement log, pruned by age
//! - the alert engine's state and runtime configuration
//! - registered notification subscriptions
//!
//! It also answers downsampled range queries (see [`RangeQuery`]).
//!
//! # Example
//!
//! ```
//! use airqmon_store::{RangeQuery, Store};
//! use airqmon_types::Sample;
//!
//! let store = Store::open_in_memory()?;
//! store.append(&Sample::new(612.0, 21.4, 38.0), 1_700_000_000)?;
//!
//! let latest = store.latest()?.expect("one row");
//! assert_eq!(latest.co2, 612.0);
//!
//! let points = store.query_range(&RangeQuery::new().points(100), 1_700_000_100)?;
//! assert_eq!(points.len(), 1);
//! # Ok::<(), airqmon_store::Error>(())
//! ```

mod downsample;
mod error;
mod queries;
mod schema;
mod store;

pub use downsample::{dedupe_timestamps, downsample};
pub use error::{Error, Result};
pub use queries::{DEFAULT_POINTS, DEFAULT_WINDOW_SECS, MAX_POINTS, RangeQuery, ResolvedRange};
pub use store::{
    KEY_ALERT_STATE, KEY_CO2_CLEAR, KEY_CO2_HIGH, KEY_COOLDOWN_SECONDS, KEY_NOTIFICATION_TOPIC,
    Store,
};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/airqmon/data.db`
/// - macOS: `~/Library/Application Support/airqmon/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\airqmon\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("airqmon")
        .join("data.db")
}
