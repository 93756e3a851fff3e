//! API key authentication.
//!
//! When `security.api_key_enabled` is set, every request that changes
//! something (any method other than GET, HEAD and OPTIONS) must carry the
//! configured key in the `X-API-Key` header. Read-only requests and the
//! health check stay open so dashboards and monitoring keep working.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::state::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

fn requires_key(method: &Method, path: &str) -> bool {
    if path == "/api/health" {
        return false;
    }
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Compare two keys in constant time.
fn keys_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// API key authentication middleware.
///
/// Returns 401 Unauthorized if a mutating request carries a missing or
/// wrong key.
pub async fn api_key_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = {
        let config = state.config.read().await;
        if !config.security.api_key_enabled {
            None
        } else {
            Some(config.security.api_key.clone().unwrap_or_default())
        }
    };

    let Some(expected) = expected else {
        return next.run(request).await;
    };
    if !requires_key(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let valid = match provided {
        Some(provided) if !expected.is_empty() => keys_match(&expected, provided),
        _ => false,
    };

    if valid {
        next.run(request).await
    } else {
        warn!(
            "API key authentication failed for {} {}",
            request.method(),
            request.uri().path()
        );
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Invalid or missing API key",
                "hint": "Provide a valid API key in the X-API-Key header"
            })),
        )
            .into_response()
    }
}
