use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::domain::{Subscription, SubscriptionPlan, User};
use crate::error::{AppError, AppResult};
use crate::http::extract::{AppJson};
use crate::http::server::AppState;
use crate::security::UserContext;

#[derive(Debug, Deserialize)]
pub struct SignUp {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct Account {
    pub user: User,
    pub subscription: Subscription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<SubscriptionPlan>,
}

pub async fn sign_up(
    State(state): State<AppState>,
    AppJson(body): AppJson<SignUp>,
) -> AppResult<(StatusCode, Json<Account>)> {
    let (user, subscription) = state.billing.create_account(&body.email, &body.name)?;
    let plan = state.billing.plan(&subscription.plan_id).ok();
    Ok((
        StatusCode::CREATED,
        Json(Account {
            user,
            subscription,
            plan,
        }),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> AppResult<Json<Account>> {
    let user = state
        .store
        .get_user(&ctx.user_id)
        .ok_or(AppError::NotFound("user"))?;
    let (subscription, plan) = state.billing.current_plan(&ctx.user_id)?;
    Ok(Json(Account {
        user,
        subscription,
        plan: Some(plan),
    }))
}

/// Plans open for sign-up.
pub async fn plans(State(state): State<AppState>) -> Json<Vec<SubscriptionPlan>> {
    Json(state.billing.offered_plans())
}
