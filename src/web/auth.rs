//! Shared bearer token check for write endpoints.

use crate::error::TelemetryError;
use crate::web::handlers::{ApiError, AppState};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::warn;

/// Reject requests whose `Authorization` header is not `Bearer <token>`.
/// Passes everything through when no token is configured.
pub async fn require_bearer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.auth_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if tokens_match(token, expected) => Ok(next.run(req).await),
        _ => {
            warn!(path = %req.uri().path(), "Rejected request with missing or invalid token");
            Err(ApiError(TelemetryError::Unauthorized))
        }
    }
}

/// Compare without short-circuiting on the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("dev-token", "dev-token"));
        assert!(!tokens_match("dev-tokem", "dev-token"));
        assert!(!tokens_match("dev", "dev-token"));
        assert!(!tokens_match("", "dev-token"));
    }
}
