//! Bearer-token authentication for the web gateway.
//!
//! The gateway is a single-operator surface: one static token, checked on
//! every protected route. Token bytes are compared in constant time so
//! response timing does not leak a byte-by-byte match.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

/// State handed to [`auth_middleware`] via `from_fn_with_state`.
#[derive(Clone)]
pub struct AuthState {
    pub token: SecretString,
}

/// Reject any request that does not carry `Authorization: Bearer <token>`.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(candidate) if token_matches(candidate, auth.token.expose_secret()) => {
            next.run(request).await
        }
        _ => (StatusCode::UNAUTHORIZED, "Missing or invalid bearer token").into_response(),
    }
}

/// Constant-time comparison. The token's length is not treated as secret,
/// only its bytes.
fn token_matches(candidate: &str, expected: &str) -> bool {
    let candidate = candidate.as_bytes();
    let expected = expected.as_bytes();
    if candidate.len() != expected.len() {
        return false;
    }
    candidate.ct_eq(expected).into()
}
