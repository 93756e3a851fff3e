//! Service configuration.
//!
//! Loaded from `<config_dir>/airqmon/server.toml`. Every section and field
//! is optional; missing values take the defaults shown below.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//! expose_topic = false
//!
//! [storage]
//! path = "~/.local/share/airqmon/data.db"
//!
//! [collector]
//! interval_secs = 10
//! sensor_timeout_secs = 5
//! # sensor_command = "scd4x-read --bus 1"
//!
//! [retention]
//! horizon_days = 7
//! prune_interval_secs = 3600
//!
//! [alerter]
//! poll_interval_secs = 5
//!
//! [notify]
//! backend = "log"          # "log", "ntfy" or "webhook"
//! ntfy_server = "https://ntfy.sh"
//! timeout_secs = 10
//!
//! [security]
//! api_key_enabled = false
//! # api_key = "a-long-random-string"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use airqmon_types::ValidationError;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Sampling loop settings.
    pub collector: CollectorConfig,
    /// Retention pruning settings.
    pub retention: RetentionConfig,
    /// Alert loop settings.
    pub alerter: AlerterConfig,
    /// Notification sink settings.
    pub notify: NotifyConfig,
    /// API security settings.
    pub security: SecurityConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use airqmon_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.collector.validate());
        errors.extend(self.retention.validate());
        errors.extend(self.alerter.validate());
        errors.extend(self.notify.validate());
        errors.extend(self.security.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Include the notification topic in `GET /api/config` responses.
    pub expose_topic: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            expose_topic: false,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: airqmon_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Minimum sampling interval in seconds.
pub const MIN_SAMPLE_INTERVAL: u64 = 1;
/// Maximum sampling interval in seconds (1 hour).
pub const MAX_SAMPLE_INTERVAL: u64 = 3600;

/// Sampling loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Seconds between two samples.
    pub interval_secs: u64,
    /// Seconds to wait for one sensor read.
    pub sensor_timeout_secs: u64,
    /// External driver command printing `co2 temperature humidity`.
    /// When unset the simulator is used.
    pub sensor_command: Option<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            sensor_timeout_secs: 5,
            sensor_command: None,
        }
    }
}

impl CollectorConfig {
    /// Sampling interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Sensor read timeout.
    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_secs(self.sensor_timeout_secs)
    }

    /// Validate collector configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_secs < MIN_SAMPLE_INTERVAL {
            errors.push(ValidationError::new(
                "collector.interval_secs",
                format!("must be at least {} second", MIN_SAMPLE_INTERVAL),
            ));
        } else if self.interval_secs > MAX_SAMPLE_INTERVAL {
            errors.push(ValidationError::new(
                "collector.interval_secs",
                format!(
                    "interval {} is too long (maximum {} seconds / 1 hour)",
                    self.interval_secs, MAX_SAMPLE_INTERVAL
                ),
            ));
        }

        if self.sensor_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "collector.sensor_timeout_secs",
                "must be at least 1 second",
            ));
        } else if self.sensor_timeout_secs > self.interval_secs {
            errors.push(ValidationError::new(
                "collector.sensor_timeout_secs",
                format!(
                    "timeout {} exceeds the sampling interval {}",
                    self.sensor_timeout_secs, self.interval_secs
                ),
            ));
        }

        if let Some(command) = &self.sensor_command
            && command.trim().is_empty()
        {
            errors.push(ValidationError::new(
                "collector.sensor_command",
                "cannot be empty string (use null/omit instead)",
            ));
        }

        errors
    }
}

/// Retention pruning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Measurements older than this many days are deleted.
    pub horizon_days: u64,
    /// Seconds between two pruning passes.
    pub prune_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: 7,
            prune_interval_secs: 3600,
        }
    }
}

impl RetentionConfig {
    /// Retention horizon in seconds.
    pub fn horizon_secs(&self) -> i64 {
        i64::try_from(self.horizon_days.saturating_mul(86_400)).unwrap_or(i64::MAX)
    }

    /// Interval between pruning passes.
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    /// Validate retention configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.horizon_days == 0 {
            errors.push(ValidationError::new(
                "retention.horizon_days",
                "must be at least 1 day",
            ));
        }
        if self.prune_interval_secs == 0 {
            errors.push(ValidationError::new(
                "retention.prune_interval_secs",
                "must be at least 1 second",
            ));
        }

        errors
    }
}

/// Alert loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlerterConfig {
    /// Seconds between two polls for new measurements.
    pub poll_interval_secs: u64,
}

impl Default for AlerterConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

impl AlerterConfig {
    /// Interval between alert polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validate alerter configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.poll_interval_secs == 0 {
            errors.push(ValidationError::new(
                "alerter.poll_interval_secs",
                "must be at least 1 second",
            ));
        }

        errors
    }
}

/// Which notification sink to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyBackend {
    /// Write notifications to the log.
    #[default]
    Log,
    /// Publish to an ntfy server.
    Ntfy,
    /// POST to every registered subscription endpoint.
    Webhook,
}

/// Notification sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Sink to deliver alerts through.
    pub backend: NotifyBackend,
    /// ntfy server base URL.
    pub ntfy_server: String,
    /// Seconds to wait for one delivery.
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            backend: NotifyBackend::Log,
            ntfy_server: "https://ntfy.sh".to_string(),
            timeout_secs: 10,
        }
    }
}

impl NotifyConfig {
    /// Delivery timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate notifier configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "notify.timeout_secs",
                "must be at least 1 second",
            ));
        }

        if self.backend == NotifyBackend::Ntfy
            && !(self.ntfy_server.starts_with("https://") || self.ntfy_server.starts_with("http://"))
        {
            errors.push(ValidationError::new(
                "notify.ntfy_server",
                format!("'{}' is not an http(s) URL", self.ntfy_server),
            ));
        }

        errors
    }
}

/// Minimum API key length.
pub const MIN_API_KEY_LEN: usize = 16;

/// API security configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Require `X-API-Key` on mutating requests.
    pub api_key_enabled: bool,
    /// The expected API key.
    pub api_key: Option<String>,
}

impl SecurityConfig {
    /// Validate security configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.api_key_enabled {
            match &self.api_key {
                None => errors.push(ValidationError::new(
                    "security.api_key",
                    "api_key is required when api_key_enabled is true",
                )),
                Some(key) if key.len() < MIN_API_KEY_LEN => errors.push(ValidationError::new(
                    "security.api_key",
                    format!("api_key must be at least {} characters", MIN_API_KEY_LEN),
                )),
                Some(_) => {}
            }
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
///
/// - Linux: `~/.config/airqmon/server.toml`
/// - macOS: `~/Library/Application Support/airqmon/server.toml`
/// - Windows: `C:\Users\<user>\AppData\Roaming\airqmon\server.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("airqmon")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.collector.interval_secs, 10);
        assert_eq!(config.collector.sensor_timeout_secs, 5);
        assert_eq!(config.retention.horizon_days, 7);
        assert_eq!(config.retention.prune_interval_secs, 3600);
        assert_eq!(config.alerter.poll_interval_secs, 5);
        assert_eq!(config.notify.backend, NotifyBackend::Log);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0:9000"

            [collector]
            interval_secs = 30
            sensor_command = "scd4x-read"

            [notify]
            backend = "ntfy"
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert!(!config.server.expose_topic);
        assert_eq!(config.collector.interval_secs, 30);
        assert_eq!(config.collector.sensor_timeout_secs, 5);
        assert_eq!(config.collector.sensor_command.as_deref(), Some("scd4x-read"));
        assert_eq!(config.notify.backend, NotifyBackend::Ntfy);
        assert_eq!(config.notify.ntfy_server, "https://ntfy.sh");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = Config::default();
        config.server.bind = "localhost".to_string();
        config.collector.sensor_timeout_secs = 0;
        config.retention.horizon_days = 0;
        config.security.api_key_enabled = true;

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "server.bind",
                "collector.sensor_timeout_secs",
                "retention.horizon_days",
                "security.api_key"
            ]
        );
    }

    #[test]
    fn test_bind_port_checks() {
        let mut server = ServerConfig::default();
        server.bind = "127.0.0.1:0".to_string();
        assert_eq!(server.validate()[0].message, "port cannot be 0");

        server.bind = "127.0.0.1:http".to_string();
        assert!(server.validate()[0].message.contains("invalid port"));

        server.bind = "[::1]:8080".to_string();
        assert!(server.validate().is_empty());
    }

    #[test]
    fn test_sensor_timeout_must_fit_interval() {
        let collector = CollectorConfig {
            interval_secs: 5,
            sensor_timeout_secs: 6,
            sensor_command: None,
        };
        assert_eq!(collector.validate()[0].field, "collector.sensor_timeout_secs");
    }

    #[test]
    fn test_short_api_key_rejected() {
        let security = SecurityConfig {
            api_key_enabled: true,
            api_key: Some("short".to_string()),
        };
        assert!(security.validate()[0].message.contains("at least 16"));
    }

    #[test]
    fn test_ntfy_server_must_be_url() {
        let notify = NotifyConfig {
            backend: NotifyBackend::Ntfy,
            ntfy_server: "ntfy.sh".to_string(),
            timeout_secs: 10,
        };
        assert_eq!(notify.validate()[0].field, "notify.ntfy_server");
    }

    #[test]
    fn test_horizon_secs() {
        assert_eq!(RetentionConfig::default().horizon_secs(), 7 * 86_400);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airqmon").join("server.toml");

        let mut config = Config::default();
        config.server.expose_topic = true;
        config.notify.backend = NotifyBackend::Webhook;
        config.save(&path).unwrap();

        let loaded = Config::load_validated(&path).unwrap();
        assert!(loaded.server.expose_topic);
        assert_eq!(loaded.notify.backend, NotifyBackend::Webhook);
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nbind=").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
