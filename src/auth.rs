//! Pre-shared API key authentication for the admin API.
//!
//! Every endpoint except `/api/health` requires an
//! `Authorization: Bearer <key>` header.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Extension type carrying the expected API key, injected into the router
/// layer so [`require_api_key`] can access it without touching `AppState`.
#[derive(Clone)]
pub struct ApiKey(pub String);

/// Reject requests without a valid Bearer token.
///
/// - `401 Unauthorized` — header missing or not a Bearer token
/// - `403 Forbidden` — wrong key
/// - `500 Internal Server Error` — [`ApiKey`] extension missing
pub async fn require_api_key(request: Request, next: Next) -> Response {
    let Some(ApiKey(expected)) = request.extensions().get::<ApiKey>().cloned() else {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error", "CONFIG");
    };

    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(provided) = provided else {
        return error(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
            "UNAUTHORIZED",
        );
    };

    if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        return error(StatusCode::FORBIDDEN, "Invalid API key", "FORBIDDEN");
    }

    next.run(request).await
}

fn error(status: StatusCode, message: &str, code: &str) -> Response {
    (status, Json(json!({"error": message, "code": code}))).into_response()
}

/// Constant-time byte comparison.
///
/// Iterates over the full length of `expected` whatever the length of
/// `provided`, so response time does not reveal the key length.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for (i, e) in expected.iter().enumerate() {
        let p = provided.get(i).copied().unwrap_or(0xff);
        diff |= e ^ p;
    }
    diff == 0
}
