//! REST API endpoints for the airqmon-service.
//!
//! # Concurrency and Lock Acquisition
//!
//! - **`state.store`** (Mutex): held only for the duration of one store
//!   call; never across a notification send.
//! - **`state.config`** (RwLock): read briefly for service settings.
//! - **`state.collector.stats`** (RwLock): read for `/api/status`.
//!
//! When several are needed they are taken in that order: `config`, then
//! `store`, then `stats`, and never held at the same time where avoidable.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors (`{"error": "..."}`) via
//! [`AppError`]. Invalid input maps to 400 or 422, store failures to 500 and
//! notification failures to 502.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use airqmon_core::{AlertMessage, AlertPhase, DeliveryReport, notify_within};
use airqmon_store::RangeQuery;
use airqmon_types::{AlertConfig, AlertState, Measurement, PushSubscription};

use crate::now_unix;
use crate::state::{AppState, CollectionStats};

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Measurements
        .route("/api/latest", get(get_latest))
        .route("/api/data", get(get_data))
        // Alerting
        .route("/api/config", get(get_config).put(update_config))
        .route("/api/alert", get(get_alert))
        .route(
            "/api/subscriptions",
            post(add_subscription).delete(remove_subscription),
        )
        .route("/api/notify/test", post(send_test_notification))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub collector: CollectorStatus,
    pub measurement_count: u64,
    pub latest_id: i64,
}

/// Collector part of [`StatusResponse`].
#[derive(Debug, Serialize)]
pub struct CollectorStatus {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub stats: CollectionStats,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let (measurement_count, latest_id) = {
        let store = state.store.lock().await;
        (store.count_measurements()?, store.max_id()?)
    };
    let stats = state.collector.stats.read().await.clone();

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at(),
        collector: CollectorStatus {
            running: state.collector.is_running(),
            started_at: state.collector.started_at(),
            stats,
        },
        measurement_count,
        latest_id,
    }))
}

/// Most recent measurement, or `null` before the first sample.
async fn get_latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<Measurement>>, AppError> {
    let latest = state.store.lock().await.latest()?;
    Ok(Json(latest))
}

/// Query parameters for `/api/data`.
#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    /// Window start (Unix seconds, inclusive).
    pub start: Option<i64>,
    /// Window end (Unix seconds, inclusive).
    pub end: Option<i64>,
    /// Maximum number of points.
    pub points: Option<i64>,
}

impl From<DataQuery> for RangeQuery {
    fn from(q: DataQuery) -> Self {
        RangeQuery {
            start: q.start,
            end: q.end,
            points: q.points,
        }
    }
}

/// Response for `/api/data`.
#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub data: Vec<Measurement>,
}

/// Downsampled measurements for a time window.
///
/// # Errors
///
/// - [`AppError::BadRequest`] for malformed parameters or `start > end`
/// - [`AppError::Store`] if the query fails
async fn get_data(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DataQuery>, QueryRejection>,
) -> Result<Json<DataResponse>, AppError> {
    let Query(query) = query?;
    let range = RangeQuery::from(query);
    let data = state.store.lock().await.query_range(&range, now_unix())?;
    Ok(Json(DataResponse { data }))
}

/// Alert configuration as returned by the API.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigResponse {
    /// Withheld (`null`) unless `server.expose_topic` is set.
    pub notification_topic: Option<String>,
    pub co2_high: i64,
    pub co2_clear: i64,
    pub cooldown_seconds: i64,
}

impl ConfigResponse {
    fn new(config: AlertConfig, expose_topic: bool) -> Self {
        Self {
            notification_topic: config.notification_topic.filter(|_| expose_topic),
            co2_high: config.co2_high,
            co2_clear: config.co2_clear,
            cooldown_seconds: config.cooldown_seconds,
        }
    }
}

async fn get_config(State(state): State<Arc<AppState>>) -> Result<Json<ConfigResponse>, AppError> {
    let expose_topic = state.config.read().await.server.expose_topic;
    let config = state.store.lock().await.peek_alert_config()?;
    Ok(Json(ConfigResponse::new(config, expose_topic)))
}

/// Request body for `PUT /api/config`.
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub co2_high: i64,
    pub co2_clear: i64,
    pub cooldown_seconds: i64,
    /// Omit to keep the current topic.
    #[serde(default, alias = "ntfy_topic")]
    pub notification_topic: Option<String>,
}

/// Replace the alert configuration.
///
/// The topic, when supplied, is echoed back even if topics are otherwise
/// withheld.
///
/// # Errors
///
/// Returns 422 if the body has the wrong shape or the values are invalid;
/// nothing is written in that case.
async fn update_config(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<ConfigResponse>, AppError> {
    let Json(update) = body?;
    let supplied_topic = update.notification_topic.is_some();
    let requested = AlertConfig {
        notification_topic: update.notification_topic.map(|t| t.trim().to_string()),
        co2_high: update.co2_high,
        co2_clear: update.co2_clear,
        cooldown_seconds: update.cooldown_seconds,
    };

    let expose_topic = state.config.read().await.server.expose_topic;
    let saved = {
        let store = state.store.lock().await;
        store.save_alert_config(&requested)?;
        store.peek_alert_config()?
    };

    Ok(Json(ConfigResponse::new(
        saved,
        expose_topic || supplied_topic,
    )))
}

/// Alert engine state.
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub phase: AlertPhase,
    /// False until the alerter has run once against this database.
    pub persisted: bool,
    #[serde(flatten)]
    pub state: AlertState,
}

/// Report the alert state without initialising it.
///
/// Before the alerter has run, this is the state it would start from.
async fn get_alert(State(state): State<Arc<AppState>>) -> Result<Json<AlertResponse>, AppError> {
    let (current, persisted) = {
        let store = state.store.lock().await;
        match store.peek_alert_state()? {
            Some(current) => (current, true),
            None => (AlertState::starting_at(store.max_id()?), false),
        }
    };
    Ok(Json(AlertResponse {
        phase: AlertPhase::of(&current),
        persisted,
        state: current,
    }))
}

/// Register a notification destination.
async fn add_subscription(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PushSubscription>, JsonRejection>,
) -> Result<(StatusCode, Json<PushSubscription>), AppError> {
    let Json(subscription) = body?;
    let stored = state.store.lock().await.add_subscription(&subscription)?;
    info!("Registered subscription {}", stored.endpoint);
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Request body for `DELETE /api/subscriptions`.
#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

/// Remove a notification destination.
async fn remove_subscription(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(request) = body?;
    let removed = state
        .store
        .lock()
        .await
        .remove_subscription(&request.endpoint)?;
    if removed {
        info!("Removed subscription {}", request.endpoint);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!(
            "Subscription not found: {}",
            request.endpoint
        )))
    }
}

/// Send a test notification through the configured sink.
///
/// # Errors
///
/// Returns [`AppError::BadGateway`] if the sink fails or times out.
async fn send_test_notification(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DeliveryReport>, AppError> {
    let limit = state.config.read().await.notify.timeout();
    let topic = state.store.lock().await.alert_config()?.notification_topic;
    let message = AlertMessage::test_notification(now_unix());

    match notify_within(state.notifier.as_ref(), topic.as_deref(), &message, limit).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            warn!("Test notification failed: {}", e);
            Err(AppError::BadGateway(e.to_string()))
        }
    }
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unprocessable(String),
    BadGateway(String),
    Store(airqmon_store::Error),
}

impl From<airqmon_store::Error> for AppError {
    fn from(e: airqmon_store::Error) -> Self {
        match e {
            airqmon_store::Error::Validation(v) => AppError::Unprocessable(v.to_string()),
            e @ airqmon_store::Error::InvalidRange { .. } => AppError::BadRequest(e.to_string()),
            e => AppError::Store(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::UNPROCESSABLE_ENTITY {
            AppError::Unprocessable(rejection.body_text())
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use airqmon_core::{LogNotifier, Notifier, RecordingNotifier};
    use airqmon_store::{KEY_ALERT_STATE, KEY_CO2_HIGH, KEY_NOTIFICATION_TOPIC, Store};
    use airqmon_types::Sample;

    use crate::config::Config;

    fn create_test_state() -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        AppState::with_notifier(store, Config::default(), Arc::new(LogNotifier))
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router()
            .with_state(Arc::clone(state))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn with_json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_latest_is_null_when_empty() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/latest")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.is_null());
    }

    #[tokio::test]
    async fn test_latest_returns_newest_row() {
        let state = create_test_state();
        {
            let store = state.store.lock().await;
            store.append(&Sample::new(700.0, 21.0, 40.0), 100).unwrap();
            store.append(&Sample::new(750.0, 21.5, 41.0), 110).unwrap();
        }

        let (status, json) = send(&state, get("/api/latest")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], 2);
        assert_eq!(json["ts"], 110);
        assert_eq!(json["co2"], 750.0);
    }

    #[tokio::test]
    async fn test_data_downsamples_window() {
        let state = create_test_state();
        {
            let store = state.store.lock().await;
            for ts in 0..100 {
                store
                    .append(&Sample::new(400.0 + ts as f64, 21.0, 40.0), 1_000 + ts)
                    .unwrap();
            }
        }

        let (status, json) = send(&state, get("/api/data?start=1000&end=1099&points=10")).await;
        assert_eq!(status, StatusCode::OK);
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 10);
        assert_eq!(data[0]["ts"], 1_000);

        let ts: Vec<i64> = data.iter().map(|m| m["ts"].as_i64().unwrap()).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]));

        let (_, full) = send(&state, get("/api/data?start=1000&end=1099&points=0")).await;
        assert_eq!(full["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_data_rejects_inverted_range() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/data?start=20&end=10")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("after end"));
    }

    #[tokio::test]
    async fn test_data_rejects_malformed_points() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/data?points=lots")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_config_withholds_topic_by_default() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/config")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["notification_topic"].is_null());
        assert_eq!(json["co2_high"], 1500);
        assert_eq!(json["co2_clear"], 500);
        assert_eq!(json["cooldown_seconds"], 1800);

        state.config.write().await.server.expose_topic = true;
        let (_, json) = send(&state, get("/api/config")).await;
        assert!(json["notification_topic"].is_null());

        state.store.lock().await.alert_config().unwrap();
        let (_, json) = send(&state, get("/api/config")).await;
        assert!(
            json["notification_topic"]
                .as_str()
                .unwrap()
                .starts_with("airqmon-")
        );
    }

    #[tokio::test]
    async fn test_update_config() {
        let state = create_test_state();
        let body = serde_json::json!({
            "co2_high": 1200,
            "co2_clear": 700,
            "cooldown_seconds": 600,
            "ntfy_topic": "  office-co2  ",
        });

        let (status, json) = send(&state, with_json("PUT", "/api/config", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["co2_high"], 1200);
        assert_eq!(json["notification_topic"], "office-co2");

        let stored = state.store.lock().await.alert_config().unwrap();
        assert_eq!(stored.co2_clear, 700);
        assert_eq!(stored.cooldown_seconds, 600);
        assert_eq!(stored.notification_topic.as_deref(), Some("office-co2"));
    }

    #[tokio::test]
    async fn test_update_config_keeps_topic_when_omitted() {
        let state = create_test_state();
        let before = state.store.lock().await.alert_config().unwrap();

        let body = serde_json::json!({"co2_high": 1000, "co2_clear": 600, "cooldown_seconds": 0});
        let (status, json) = send(&state, with_json("PUT", "/api/config", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["notification_topic"].is_null());

        let after = state.store.lock().await.alert_config().unwrap();
        assert_eq!(after.notification_topic, before.notification_topic);
        assert_eq!(after.co2_high, 1000);
    }

    #[tokio::test]
    async fn test_update_config_validation() {
        let state = create_test_state();

        let inverted = serde_json::json!({"co2_high": 800, "co2_clear": 900, "cooldown_seconds": 0});
        let (status, json) = send(&state, with_json("PUT", "/api/config", inverted)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].as_str().unwrap().contains("co2_clear"));

        let blank_topic = serde_json::json!({
            "co2_high": 1500, "co2_clear": 500, "cooldown_seconds": 0, "notification_topic": "  "
        });
        let (status, _) = send(&state, with_json("PUT", "/api/config", blank_topic)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let not_a_number = serde_json::json!({"co2_high": "high", "co2_clear": 500, "cooldown_seconds": 0});
        let (status, json) = send(&state, with_json("PUT", "/api/config", not_a_number)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].is_string());

        let stored = state.store.lock().await.alert_config().unwrap();
        assert_eq!(stored.co2_high, 1500);
    }

    #[tokio::test]
    async fn test_alert_endpoint() {
        let state = create_test_state();
        state
            .store
            .lock()
            .await
            .save_alert_state(&AlertState {
                last_seen_id: 9,
                in_alert: true,
                last_alert_ts: Some(1_700_000_000),
            })
            .unwrap();

        let (status, json) = send(&state, get("/api/alert")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "in_alert");
        assert_eq!(json["persisted"], true);
        assert_eq!(json["last_seen_id"], 9);
        assert_eq!(json["in_alert"], true);
        assert_eq!(json["last_alert_ts"], 1_700_000_000);
    }

    #[tokio::test]
    async fn test_reads_leave_alert_keys_untouched() {
        let state = create_test_state();
        {
            let store = state.store.lock().await;
            for ts in 0..5 {
                store.append(&Sample::new(1_800.0, 21.0, 40.0), ts).unwrap();
            }
        }

        let (status, json) = send(&state, get("/api/alert")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["persisted"], false);
        assert_eq!(json["last_seen_id"], 5);
        assert_eq!(json["in_alert"], false);

        let (status, _) = send(&state, get("/api/config")).await;
        assert_eq!(status, StatusCode::OK);

        let store = state.store.lock().await;
        for key in [KEY_ALERT_STATE, KEY_CO2_HIGH, KEY_NOTIFICATION_TOPIC] {
            assert!(store.get_value(key).unwrap().is_none(), "{key} was written");
        }
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let state = create_test_state();
        state
            .store
            .lock()
            .await
            .append(&Sample::new(650.0, 21.0, 40.0), 5)
            .unwrap();
        state
            .collector
            .stats
            .write()
            .await
            .record_success(OffsetDateTime::UNIX_EPOCH);

        let (status, json) = send(&state, get("/api/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["measurement_count"], 1);
        assert_eq!(json["latest_id"], 1);
        assert_eq!(json["collector"]["running"], false);
        assert_eq!(json["collector"]["success_count"], 1);
        assert!(json["started_at"].is_string());
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let state = create_test_state();
        let body = serde_json::json!({"endpoint": "https://push.example/abc", "p256dh": "key"});

        let (status, json) = send(&state, with_json("POST", "/api/subscriptions", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["endpoint"], "https://push.example/abc");
        assert!(json["created_at"].as_i64().unwrap() > 0);

        let remove = serde_json::json!({"endpoint": "https://push.example/abc"});
        let (status, _) = send(&state, with_json("DELETE", "/api/subscriptions", remove.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, json) = send(&state, with_json("DELETE", "/api/subscriptions", remove)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_invalid_subscription_rejected() {
        let state = create_test_state();
        let body = serde_json::json!({"endpoint": "ftp://nope"});
        let (status, _) = send(&state, with_json("POST", "/api/subscriptions", body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_notify_test_endpoint() {
        let recorder = Arc::new(RecordingNotifier::new());
        let notifier: Arc<dyn Notifier> = recorder.clone();
        let state = AppState::with_notifier(
            Store::open_in_memory().unwrap(),
            Config::default(),
            notifier,
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/notify/test")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sent"], 1);
        assert_eq!(recorder.sent().await.len(), 1);

        recorder.set_should_fail(true);
        let request = Request::builder()
            .method("POST")
            .uri("/api/notify/test")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(json["error"].as_str().unwrap().contains("failed"));
    }

    #[test]
    fn test_app_error_status_mapping() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Unprocessable("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::BadGateway("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }

        let err = AppError::from(airqmon_store::Error::InvalidRange { start: 2, end: 1 });
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
