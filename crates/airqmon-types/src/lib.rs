//! Shared data model for the AirQMon air-quality monitor.
//!
//! This crate holds the types exchanged between the store, the sampling
//! and alerting loops and the HTTP API:
//!
//! - [`Measurement`] and [`Sample`] for sensor readings
//! - [`AlertState`] and [`AlertConfig`] for the alert engine
//! - [`PushSubscription`] for registered notification destinations
//!
//! # Example
//!
//! ```
//! use airqmon_types::{AlertConfig, AlertState};
//!
//! let config = AlertConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let state = AlertState::starting_at(42);
//! assert_eq!(state.last_seen_id, 42);
//! assert!(!state.in_alert);
//! ```

pub mod error;
pub mod types;

pub use error::ValidationError;
pub use types::{
    AlertConfig, AlertState, DEFAULT_CO2_CLEAR, DEFAULT_CO2_HIGH, DEFAULT_COOLDOWN_SECONDS,
    MAX_TOPIC_LEN, Measurement, PushSubscription, Sample, TOPIC_PREFIX, generate_topic,
    is_valid_topic,
};

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_json_shape() {
        let m = Measurement {
            id: 1,
            ts: 1_700_000_000,
            co2: 640.0,
            temperature: 22.1,
            humidity: 41.5,
        };
        let json: serde_json::Value = serde_json::to_value(&m).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["ts"], 1_700_000_000i64);
        assert_eq!(json["co2"], 640.0);
        assert_eq!(json["temperature"], 22.1);
        assert_eq!(json["humidity"], 41.5);
    }

    #[test]
    fn test_alert_state_roundtrip_keeps_null_alert_ts() {
        let state = AlertState::starting_at(9);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"last_alert_ts\":null"));
        let back: AlertState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_subscription_defaults_optional_fields() {
        let sub: PushSubscription =
            serde_json::from_str(r#"{"endpoint":"https://push.example/1"}"#).unwrap();
        assert_eq!(sub.endpoint, "https://push.example/1");
        assert!(sub.p256dh.is_none());
        assert_eq!(sub.created_at, 0);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn validate_accepts_exactly_ordered_thresholds(
                high in 1i64..10_000,
                clear in 0i64..10_000,
                cooldown in 0i64..86_400,
            ) {
                let config = AlertConfig {
                    notification_topic: None,
                    co2_high: high,
                    co2_clear: clear,
                    cooldown_seconds: cooldown,
                };
                prop_assert_eq!(config.validate().is_ok(), clear < high);
            }
        }
    }
}
