//! Content guards. A guard decides whether a request against a
//! guarded distribution is allowed; the dispatcher only ever sees the trait,
//! never a concrete guard kind, so alternate guards can be added later
//! without touching it.

use axum::http::HeaderMap;

use crate::models::{ContentGuard, ContentGuardKind};

/// Implemented by each guard kind. `permit` returning `Err` carries the
/// reason shown to the client in the 403 body.
pub trait GuardCheck: Send + Sync {
    fn permit(&self, guard: &ContentGuard, headers: &HeaderMap) -> Result<(), String>;
}

/// The one reference guard this crate ships: a static bearer token per
/// distribution, configured as `{"token": "..."}` in `ContentGuard::config`.
pub struct BearerTokenGuard;

impl GuardCheck for BearerTokenGuard {
    fn permit(&self, guard: &ContentGuard, headers: &HeaderMap) -> Result<(), String> {
        let expected = guard
            .config
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "guard misconfigured: no token set".to_string())?;

        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match provided {
            Some(token) if token == expected => Ok(()),
            _ => Err("missing or invalid bearer token".to_string()),
        }
    }
}

/// Dispatches to the concrete guard implementation by kind and runs it.
/// `None` guard always allows.
pub fn check(guard: Option<&ContentGuard>, headers: &HeaderMap) -> Result<(), String> {
    let Some(guard) = guard else {
        return Ok(());
    };
    let check: &dyn GuardCheck = match guard.kind {
        ContentGuardKind::BearerToken => &BearerTokenGuard,
    };
    check.permit(guard, headers)
}

#[test]
fn test_no_guard_allows() {
    let headers = HeaderMap::new();
    assert!(check(None, &headers).is_ok());
}

#[test]
fn test_bearer_token_rejects_missing_header() {
    let guard = ContentGuard {
        id: uuid::Uuid::new_v4(),
        name: "test".to_string(),
        kind: ContentGuardKind::BearerToken,
        config: serde_json::json!({"token": "secret"}),
    };
    let headers = HeaderMap::new();
    assert!(check(Some(&guard), &headers).is_err());
}

#[test]
fn test_bearer_token_accepts_matching_token() {
    let guard = ContentGuard {
        id: uuid::Uuid::new_v4(),
        name: "test".to_string(),
        kind: ContentGuardKind::BearerToken,
        config: serde_json::json!({"token": "secret"}),
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::AUTHORIZATION,
        "Bearer secret".parse().unwrap(),
    );
    assert!(check(Some(&guard), &headers).is_ok());
}
