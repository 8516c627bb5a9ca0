use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use secrecy::ExposeSecret;
use tracing::debug;

use crate::handlers::ApiError;
use crate::server::AppState;

/// Constant-time comparison for auth validation.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Reject requests whose bearer token does not match the configured secret.
/// An empty secret matches nothing.
pub async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let secret = state.api_secret.expose_secret();
    match token {
        Some(token) if !secret.is_empty() && constant_time_eq(token.as_bytes(), secret.as_bytes()) => {
            next.run(req).await
        }
        _ => {
            debug!(path = %req.uri().path(), "unauthorized request");
            ApiError::unauthorized().into_response()
        }
    }
}
