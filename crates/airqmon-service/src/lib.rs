//! CO2 collector, retention pruner, alerter and HTTP API for AirQMon.
//!
//! This crate provides a service that:
//! - Samples a CO2 sensor on a fixed schedule and appends every reading
//! - Prunes measurements older than the retention horizon
//! - Runs the restart-safe alert state machine and sends notifications
//! - Exposes a REST API for live and historical data and alert settings
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check (no auth required)
//! - `GET /api/status` - Collector statistics and measurement count
//! - `GET /api/latest` - Most recent measurement (or `null`)
//! - `GET /api/data?start&end&points` - Downsampled history
//! - `GET /api/config`, `PUT /api/config` - Alert thresholds and cooldown
//! - `GET /api/alert` - Alert engine state
//! - `POST /api/subscriptions`, `DELETE /api/subscriptions` - Webhook recipients
//! - `POST /api/notify/test` - Send a test notification
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/airqmon/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [collector]
//! interval_secs = 10
//! sensor_command = "scd4x-read --bus 1"
//!
//! [retention]
//! horizon_days = 7
//!
//! [notify]
//! backend = "ntfy"
//! ```
//!
//! # Security
//!
//! ```toml
//! [security]
//! # Require X-API-Key on requests that change something
//! api_key_enabled = true
//! api_key = "your-secure-random-key-at-least-16-chars"
//! ```

use std::sync::Arc;

use axum::Router;
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod alerter;
pub mod api;
pub mod collector;
pub mod config;
pub mod middleware;
pub mod notifiers;
pub mod pruner;
pub mod state;

pub use alerter::{Alerter, AlerterError};
pub use collector::{Collector, CollectorError, build_sensor};
pub use config::{
    AlerterConfig, CollectorConfig, Config, ConfigError, NotifyBackend, NotifyConfig,
    RetentionConfig, SecurityConfig, ServerConfig, StorageConfig,
};
pub use notifiers::{StoreSubscriptions, build_notifier};
pub use pruner::Pruner;
pub use state::{AppState, CollectionStats, SharedStore};

/// Build the HTTP application: API routes with authentication, request
/// tracing and CORS.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::router())
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::api_key_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Current wall-clock time as Unix seconds.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
