//! Customer identity middleware.
//! Resolves the `X-User-Id` header into a known user.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::domain::UserId;
use crate::error::AppError;
use crate::http::server::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Context attached to authenticated customer requests.
#[derive(Clone, Copy, Debug)]
pub struct UserContext {
    pub user_id: UserId,
}

pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(AppError::Unauthorized)?;

    if state.store.get_user(&user_id).is_none() {
        tracing::debug!(user_id = %user_id, "Unknown user id");
        return Err(AppError::Unauthorized);
    }

    req.extensions_mut().insert(UserContext { user_id });
    Ok(next.run(req).await)
}
