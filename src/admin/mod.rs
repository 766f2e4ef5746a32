//! Operator API, guarded by the admin bearer key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/users", get(list_users))
        .route("/admin/users/{id}", delete(delete_user))
        .route("/admin/users/{id}/plan", post(set_user_plan))
        .route("/admin/plans", get(list_plans).post(create_plan))
        .route("/admin/plans/{id}", put(update_plan).delete(archive_plan))
        .route("/admin/payments", get(list_payments))
        .route("/admin/payments/{id}/approve", post(approve_payment))
        .route("/admin/payments/{id}/reject", post(reject_payment))
        .route("/admin/audit", get(list_audit))
        .route("/admin/subscriptions/sweep", post(sweep_subscriptions))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
}
