//! Application error type and its HTTP mapping.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::billing::reconcile::SelectionError;
use crate::billing::webhook::WebhookError;
use crate::domain::FormId;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("plan allows {limit} active forms")]
    FormLimitReached { limit: u32 },

    #[error("plan allows {limit} submissions per billing period")]
    SubmissionLimitReached { limit: u32 },

    #[error("form {0} is locked by the current plan")]
    FormLocked(FormId),

    #[error("this plan allows {limit} active forms but {active} are active; choose exactly {limit} forms to keep")]
    SelectionRequired { limit: u32, active: usize },

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("a plan change is already pending")]
    PendingChangeExists,

    #[error("already subscribed to this plan")]
    SamePlan,

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl AppError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Validation(_) => "validation",
            AppError::Conflict(_) => "conflict",
            AppError::FormLimitReached { .. } => "form_limit_reached",
            AppError::SubmissionLimitReached { .. } => "submission_limit_reached",
            AppError::FormLocked(_) => "form_locked",
            AppError::SelectionRequired { .. } => "selection_required",
            AppError::Selection(_) => "invalid_selection",
            AppError::PendingChangeExists => "pending_change_exists",
            AppError::SamePlan => "same_plan",
            AppError::Webhook(WebhookError::Payload(_)) => "invalid_payload",
            AppError::Webhook(_) => "invalid_signature",
            AppError::RateLimited => "rate_limited",
            AppError::Store(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Validation(_)
            | AppError::SelectionRequired { .. }
            | AppError::Selection(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::PendingChangeExists | AppError::SamePlan => {
                StatusCode::CONFLICT
            }
            AppError::FormLimitReached { .. } | AppError::SubmissionLimitReached { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            AppError::FormLocked(_) => StatusCode::FORBIDDEN,
            AppError::Webhook(WebhookError::Payload(_)) => StatusCode::BAD_REQUEST,
            AppError::Webhook(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }

        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
