//! `x-api-key` authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::app::AppState;
use crate::domain::AppError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests without the configured API key.
///
/// A missing header is `401`; a wrong key, or no key configured on the
/// server, is `403`.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Authentication("API key is required".to_string()))?;

    let expected = state.api_key.as_ref().ok_or_else(|| {
        warn!("Rejecting request: no API key configured on server");
        AppError::Authorization("API key not configured on server".to_string())
    })?;

    if !keys_match(provided, expected.expose_secret()) {
        warn!(path = %request.uri().path(), "Rejecting request with invalid API key");
        return Err(AppError::Authorization("Invalid API key".to_string()));
    }

    Ok(next.run(request).await)
}

/// Compare keys in time independent of where they first differ.
/// Only the length can leak.
fn keys_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_match() {
        assert!(keys_match("test-api-key", "test-api-key"));
        assert!(!keys_match("test-api-kex", "test-api-key"));
        assert!(!keys_match("test-api-key-longer", "test-api-key"));
        assert!(!keys_match("", "test-api-key"));
    }
}
