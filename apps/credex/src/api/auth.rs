//! # Authentication Module
//!
//! Bearer API keys resolve the calling user.
//!
//! ```text
//! Authorization: Bearer <your-api-key>
//! ```
//!
//! A request with a known key runs as that user. A request without an
//! `Authorization` header runs anonymously (ledger mutations then fail with
//! 401). A request with an unknown key is rejected outright.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use credex_core::{Caller, SpaceId, UserId};
use std::sync::Arc;
use subtle::ConstantTimeEq;

// =============================================================================
// KEY TABLE
// =============================================================================

/// API key → user lookup shared by every request.
#[derive(Debug, Clone)]
pub struct ApiKeys {
    keys: Vec<(String, UserId)>,
    space: SpaceId,
}

impl ApiKeys {
    #[must_use]
    pub fn new(keys: Vec<(String, UserId)>, space: SpaceId) -> Self {
        Self { keys, space }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve `provided` against every configured key.
    ///
    /// Every key is compared in constant time and the scan never exits
    /// early, so timing does not reveal which key (or key length) matched.
    #[must_use]
    pub fn resolve(&self, provided: &str) -> Option<UserId> {
        let mut found = None;
        for (key, user) in &self.keys {
            if keys_match(provided.as_bytes(), key.as_bytes()) {
                found = Some(*user);
            }
        }
        found
    }

    /// Caller in the configured space, anonymous when `user` is `None`.
    #[must_use]
    pub fn caller(&self, user: Option<UserId>) -> Caller {
        let caller = match user {
            Some(user) => Caller::user(user),
            None => Caller::anonymous(),
        };
        caller.in_space(self.space.clone())
    }
}

/// Constant-time comparison over the longer of the two inputs.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    let max_len = provided.len().max(expected.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided.len()].copy_from_slice(provided);
    padded_expected[..expected.len()].copy_from_slice(expected);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided.len() == expected.len()
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

/// Resolve the caller and attach it to the request as an extension.
///
/// `/health` is always allowed (for load balancer checks).
pub async fn api_key_auth_middleware(
    State(keys): State<Arc<ApiKeys>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let user = match auth_header {
        None => None,
        Some(header_value) => {
            // Support both "Bearer <key>" and raw "<key>" formats
            let provided = header_value
                .strip_prefix("Bearer ")
                .unwrap_or(&header_value)
                .trim();
            if provided.is_empty() {
                tracing::warn!(
                    event = "auth_failure",
                    reason = "empty_api_key",
                    "Authentication failed: empty API key"
                );
                return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
            }
            match keys.resolve(provided) {
                Some(user) => Some(user),
                None => {
                    tracing::warn!(
                        event = "auth_failure",
                        reason = "invalid_api_key",
                        "Authentication failed: invalid API key"
                    );
                    return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
                }
            }
        }
    };

    request.extensions_mut().insert(keys.caller(user));
    Ok(next.run(request).await)
}

// =============================================================================
// TESTS
// =============================================================================
