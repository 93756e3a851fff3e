//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use airqmon_types::{
    AlertConfig, AlertState, DEFAULT_CO2_CLEAR, DEFAULT_CO2_HIGH, DEFAULT_COOLDOWN_SECONDS,
    Measurement, PushSubscription, Sample, generate_topic,
};

use crate::downsample::downsample;
use crate::error::{Error, Result};
use crate::queries::RangeQuery;
use crate::schema;

/// Key holding the JSON-encoded [`AlertState`].
pub const KEY_ALERT_STATE: &str = "alert:state";
/// Key holding [`AlertConfig::co2_high`].
pub const KEY_CO2_HIGH: &str = "alert:co2_high";
/// Key holding [`AlertConfig::co2_clear`].
pub const KEY_CO2_CLEAR: &str = "alert:co2_clear";
/// Key holding [`AlertConfig::cooldown_seconds`].
pub const KEY_COOLDOWN_SECONDS: &str = "alert:cooldown_seconds";
/// Key holding [`AlertConfig::notification_topic`].
pub const KEY_NOTIFICATION_TOPIC: &str = "alert:notification_topic";

/// SQLite-based store for measurements and alert bookkeeping.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        // Every committed write must survive power loss; other processes may
        // hold the write lock briefly.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Read a raw `kv_state` entry.
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv_state WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a raw `kv_state` entry, bypassing validation.
    ///
    /// Prefer [`Store::save_alert_config`] and [`Store::save_alert_state`];
    /// this exists for maintenance tooling that edits single keys.
    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv_state (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }
}

fn measurement_from_row(row: &Row<'_>) -> rusqlite::Result<Measurement> {
    Ok(Measurement {
        id: row.get(0)?,
        ts: row.get(1)?,
        co2: row.get(2)?,
        temperature: row.get(3)?,
        humidity: row.get(4)?,
    })
}

const MEASUREMENT_COLUMNS: &str = "id, ts, co2, temperature, humidity";

// Measurement operations
impl Store {
    /// Append a measurement captured at `ts` (Unix seconds).
    ///
    /// The id is assigned by SQLite as part of the insert and is never
    /// reused, even if the newest rows are later pruned.
    pub fn append(&self, sample: &Sample, ts: i64) -> Result<Measurement> {
        self.conn.execute(
            "INSERT INTO measurements (ts, co2, temperature, humidity) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![ts, sample.co2, sample.temperature, sample.humidity],
        )?;

        Ok(Measurement {
            id: self.conn.last_insert_rowid(),
            ts,
            co2: sample.co2,
            temperature: sample.temperature,
            humidity: sample.humidity,
        })
    }

    /// Most recent measurement by timestamp (highest id on ties).
    pub fn latest(&self) -> Result<Option<Measurement>> {
        let sql = format!(
            "SELECT {MEASUREMENT_COLUMNS} FROM measurements ORDER BY ts DESC, id DESC LIMIT 1"
        );
        let latest = self
            .conn
            .query_row(&sql, [], measurement_from_row)
            .optional()?;
        Ok(latest)
    }

    /// Measurements with `id > since_id`, ascending by id.
    pub fn range_since(&self, since_id: i64) -> Result<Vec<Measurement>> {
        let sql =
            format!("SELECT {MEASUREMENT_COLUMNS} FROM measurements WHERE id > ? ORDER BY id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([since_id], measurement_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Measurements with `start <= ts <= end`, ascending by ts then id.
    pub fn range_by_time(&self, start: i64, end: i64) -> Result<Vec<Measurement>> {
        let sql = format!(
            "SELECT {MEASUREMENT_COLUMNS} FROM measurements
             WHERE ts >= ?1 AND ts <= ?2 ORDER BY ts ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([start, end], measurement_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Downsampled measurements for a history request.
    ///
    /// Defaults in `query` are resolved against `now`; see
    /// [`RangeQuery::resolve`].
    pub fn query_range(&self, query: &RangeQuery, now: i64) -> Result<Vec<Measurement>> {
        let range = query.resolve(now)?;
        let rows = self.range_by_time(range.start, range.end)?;
        let raw = rows.len();
        let points = downsample(rows, range.start, range.end, range.max_points);

        debug!(
            "Range {}..={}: {} raw rows, {} returned (max {})",
            range.start,
            range.end,
            raw,
            points.len(),
            range.max_points
        );
        Ok(points)
    }

    /// Delete measurements with `ts < cutoff`. Returns the number removed.
    pub fn delete_older_than(&self, cutoff: i64) -> Result<u64> {
        let deleted = self
            .conn
            .execute("DELETE FROM measurements WHERE ts < ?", [cutoff])?;
        Ok(deleted as u64)
    }

    /// Number of stored measurements.
    pub fn count_measurements(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Highest stored measurement id, or 0 for an empty table.
    pub fn max_id(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM measurements",
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }
}

// Alert state and configuration
impl Store {
    /// Read the alert engine state without initialising it.
    ///
    /// Returns `None` if no state was saved yet or the stored value cannot
    /// be decoded. Nothing is written.
    pub fn peek_alert_state(&self) -> Result<Option<AlertState>> {
        let Some(raw) = self.get_value(KEY_ALERT_STATE)? else {
            return Ok(None);
        };
        match serde_json::from_str::<AlertState>(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!("Stored alert state is unreadable ({})", e);
                Ok(None)
            }
        }
    }

    /// Load the alert engine state, initialising it if needed.
    ///
    /// On first use (or if the stored value cannot be decoded) the state is
    /// initialised at the current highest id and persisted, so measurements
    /// recorded before the alert engine first ran never trigger alerts.
    /// Only the alert engine should call this; readers use
    /// [`Store::peek_alert_state`].
    pub fn alert_state(&self) -> Result<AlertState> {
        if let Some(state) = self.peek_alert_state()? {
            return Ok(state);
        }

        let state = AlertState::starting_at(self.max_id()?);
        self.save_alert_state(&state)?;
        info!("Initialised alert state at id {}", state.last_seen_id);
        Ok(state)
    }

    /// Replace the alert engine state in one atomic write.
    pub fn save_alert_state(&self, state: &AlertState) -> Result<()> {
        let value = serde_json::to_string(state)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO kv_state (key, value) VALUES (?1, ?2)",
            rusqlite::params![KEY_ALERT_STATE, value],
        )?;
        tx.commit()?;

        debug!(
            "Saved alert state: last_seen_id={}, in_alert={}",
            state.last_seen_id, state.in_alert
        );
        Ok(())
    }

    /// Stored alert configuration plus the keys that were missing.
    ///
    /// Missing or unparsable thresholds take their defaults; a missing or
    /// blank topic is `None`.
    fn read_alert_config(&self) -> Result<(AlertConfig, Vec<&'static str>)> {
        let mut missing = Vec::new();

        let mut read_int = |key: &'static str, default: i64| -> Result<i64> {
            match self.get_value(key)? {
                None => {
                    missing.push(key);
                    Ok(default)
                }
                Some(raw) => Ok(raw.trim().parse().unwrap_or_else(|_| {
                    warn!("Ignoring unparsable value '{}' for {}", raw, key);
                    default
                })),
            }
        };

        let co2_high = read_int(KEY_CO2_HIGH, DEFAULT_CO2_HIGH)?;
        let co2_clear = read_int(KEY_CO2_CLEAR, DEFAULT_CO2_CLEAR)?;
        let cooldown_seconds = read_int(KEY_COOLDOWN_SECONDS, DEFAULT_COOLDOWN_SECONDS)?;

        let notification_topic = self
            .get_value(KEY_NOTIFICATION_TOPIC)?
            .filter(|topic| !topic.trim().is_empty());
        if notification_topic.is_none() {
            missing.push(KEY_NOTIFICATION_TOPIC);
        }

        let config = AlertConfig {
            notification_topic,
            co2_high,
            co2_clear,
            cooldown_seconds,
        };
        Ok((config, missing))
    }

    /// Read the alert configuration without writing defaults back.
    ///
    /// Missing thresholds read as their defaults and a missing topic as
    /// `None`.
    pub fn peek_alert_config(&self) -> Result<AlertConfig> {
        Ok(self.read_alert_config()?.0)
    }

    /// Load the alert configuration.
    ///
    /// Missing keys are filled with defaults (a fresh topic for the
    /// notification topic) and written back in one transaction. Values that
    /// cannot be parsed fall back to the default without being overwritten.
    /// The result is not validated; callers decide how to treat an invalid
    /// stored configuration.
    pub fn alert_config(&self) -> Result<AlertConfig> {
        let (mut config, missing) = self.read_alert_config()?;
        if missing.is_empty() {
            return Ok(config);
        }

        let topic = config
            .notification_topic
            .get_or_insert_with(generate_topic)
            .clone();

        let tx = self.conn.unchecked_transaction()?;
        for key in &missing {
            let value = match *key {
                KEY_CO2_HIGH => config.co2_high.to_string(),
                KEY_CO2_CLEAR => config.co2_clear.to_string(),
                KEY_COOLDOWN_SECONDS => config.cooldown_seconds.to_string(),
                _ => topic.clone(),
            };
            tx.execute(
                "INSERT OR REPLACE INTO kv_state (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )?;
        }
        tx.commit()?;
        info!("Wrote {} default alert setting(s)", missing.len());

        Ok(config)
    }

    /// Validate and save the alert configuration in one transaction.
    ///
    /// A `None` topic leaves the stored topic unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] without writing anything if the
    /// configuration is invalid.
    pub fn save_alert_config(&self, config: &AlertConfig) -> Result<()> {
        config.validate()?;

        let tx = self.conn.unchecked_transaction()?;
        let put = |key: &str, value: String| {
            tx.execute(
                "INSERT OR REPLACE INTO kv_state (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
        };
        put(KEY_CO2_HIGH, config.co2_high.to_string())?;
        put(KEY_CO2_CLEAR, config.co2_clear.to_string())?;
        put(KEY_COOLDOWN_SECONDS, config.cooldown_seconds.to_string())?;
        if let Some(topic) = &config.notification_topic {
            put(KEY_NOTIFICATION_TOPIC, topic.trim().to_string())?;
        }
        tx.commit()?;

        info!(
            "Saved alert config: high={} clear={} cooldown={}s",
            config.co2_high, config.co2_clear, config.cooldown_seconds
        );
        Ok(())
    }
}

// Subscription operations
impl Store {
    /// Register a notification destination, replacing one with the same
    /// endpoint. A zero `created_at` is set to the current time.
    pub fn add_subscription(&self, subscription: &PushSubscription) -> Result<PushSubscription> {
        subscription.validate()?;

        let mut stored = subscription.clone();
        stored.endpoint = stored.endpoint.trim().to_string();
        if stored.created_at == 0 {
            stored.created_at = OffsetDateTime::now_utc().unix_timestamp();
        }

        self.conn.execute(
            "INSERT INTO push_subscriptions (endpoint, p256dh, auth, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(endpoint) DO UPDATE SET
                p256dh = ?2,
                auth = ?3",
            rusqlite::params![stored.endpoint, stored.p256dh, stored.auth, stored.created_at],
        )?;

        debug!("Stored subscription {}", stored.endpoint);
        Ok(stored)
    }

    /// Remove a destination. Returns `false` if it was not registered.
    pub fn remove_subscription(&self, endpoint: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM push_subscriptions WHERE endpoint = ?",
            [endpoint.trim()],
        )?;
        Ok(removed > 0)
    }

    /// All registered destinations, oldest first.
    pub fn list_subscriptions(&self) -> Result<Vec<PushSubscription>> {
        let mut stmt = self.conn.prepare(
            "SELECT endpoint, p256dh, auth, created_at FROM push_subscriptions
             ORDER BY created_at ASC, endpoint ASC",
        )?;
        let subs = stmt
            .query_map([], |row| {
                Ok(PushSubscription {
                    endpoint: row.get(0)?,
                    p256dh: row.get(1)?,
                    auth: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(subs)
    }
}
