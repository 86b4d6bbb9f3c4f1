// =============================================================================
// Gateway Authentication — API-key gate and documentation Basic-auth gate
// =============================================================================
//
// Two independent gates:
//
//   - API-key gate (`require_api_key`, mounted as route middleware on the
//     market-data and trading routers). Reads the key from `AcessKey`, falling
//     back to `Authorization`. With no keys configured the gate is Open and
//     lets everything through.
//
//   - Documentation gate (`require_docs_login`, mounted on the docs router).
//     Always requires the configured username/password via HTTP Basic,
//     whatever the key set.
//
// Secrets are compared as SHA-256 digests in constant time, and every key is
// examined on each check. Presented credentials are only ever logged as a
// short digest fingerprint.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::credentials::{CredentialStore, DocsCredentials};
use crate::error::{ApiError, API_KEY_FALLBACK_HEADER, API_KEY_HEADER};
use crate::types::AuthMode;

// =============================================================================
// Constant-time comparison
// =============================================================================

/// Compare two byte slices in constant time. Returns `true` if they are
/// identical. The comparison always examines every byte of both slices even
/// when a mismatch is found early.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Digest-then-compare, so the running time does not depend on the length
/// of either secret.
fn secrets_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    constant_time_eq(&a, &b)
}

/// Short, non-reversible label for a presented credential.
pub fn fingerprint(credential: &str) -> String {
    let digest = Sha256::digest(credential.as_bytes());
    hex::encode(&digest[..4])
}

// =============================================================================
// API-key gate
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Reject,
}

/// Decide whether `credential` may use the API. The mode is taken from the
/// store exactly once per check.
pub fn check_api_key(store: &CredentialStore, credential: Option<&str>) -> GateDecision {
    match store.mode() {
        AuthMode::Open => GateDecision::Allow,
        AuthMode::Enforced => {
            let Some(credential) = credential else {
                warn!("API request without credential rejected");
                return GateDecision::Reject;
            };

            let mut matched = false;
            for key in store.api_keys() {
                matched |= secrets_match(credential, key);
            }

            let fp = fingerprint(credential);
            if matched {
                debug!(credential = %fp, "API key accepted");
                GateDecision::Allow
            } else {
                warn!(credential = %fp, "API key rejected");
                GateDecision::Reject
            }
        }
    }
}

/// The key presented on a request: `AcessKey` if non-empty, otherwise the raw
/// `Authorization` value.
fn presented_key(headers: &HeaderMap) -> Option<String> {
    [API_KEY_HEADER, API_KEY_FALLBACK_HEADER]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Route middleware guarding the market-data and trading namespaces.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credential = presented_key(request.headers());
    match check_api_key(&state.credentials, credential.as_deref()) {
        GateDecision::Allow => Ok(next.run(request).await),
        GateDecision::Reject => Err(ApiError::AuthRejected),
    }
}

// =============================================================================
// Documentation gate
// =============================================================================

/// Returned when documentation authentication fails. Carries the Basic
/// challenge so browsers prompt for the login.
pub struct DocsRejection;

impl IntoResponse for DocsRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": "Documentation requires authentication",
        });
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"docs\"")],
            Json(body),
        )
            .into_response()
    }
}

/// Decode `Basic <base64(user:pass)>`.
fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Both fields are always compared.
fn docs_login_matches(expected: &DocsCredentials, username: &str, password: &str) -> bool {
    let user_ok = secrets_match(username, &expected.username);
    let pass_ok = secrets_match(password, &expected.password);
    user_ok & pass_ok
}

/// Route middleware guarding the documentation router. Always requires the
/// configured Basic pair, whatever the API-key mode.
pub async fn require_docs_login(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, DocsRejection> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some((username, password)) = authorization.and_then(decode_basic) else {
        debug!(path = %request.uri().path(), "documentation request without Basic credentials");
        return Err(DocsRejection);
    };

    if !docs_login_matches(state.credentials.docs(), &username, &password) {
        warn!(path = %request.uri().path(), user = %fingerprint(&username), "documentation login rejected");
        return Err(DocsRejection);
    }

    Ok(next.run(request).await)
}

// =============================================================================
// Tests
// =============================================================================
