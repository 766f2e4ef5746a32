use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;
use crate::http::server::AppState;

/// Require `Authorization: Bearer <admin.api_key>`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let config = state.config.load();
    match token {
        Some(token) if keys_match(token, &config.admin.api_key) => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            Err(AppError::Unauthorized)
        }
    }
}

/// Compare keys without leaking the matching prefix length through timing.
///
/// Both sides are reduced to HMAC tags first, so the final comparison is
/// fixed-length and done by `verify_slice`.
fn keys_match(presented: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let tag = |key: &str| {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(b"formdesk-admin-key").ok()?;
        mac.update(key.as_bytes());
        Some(mac)
    };
    let (Some(presented), Some(expected)) = (tag(presented), tag(expected)) else {
        return false;
    };
    presented.verify_slice(&expected.finalize().into_bytes()).is_ok()
}
