//! Liveness endpoint.
//!
//! Answers as long as the HTTP server is accepting requests, regardless of
//! the upstream feed. Feed health is reported by `/healthcheck/status`.

use axum::http::StatusCode;

/// Returns 200 with the text "OK".
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
