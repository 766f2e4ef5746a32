use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::billing::service::PlanChangePreview;
use crate::billing::{ChangePlanRequest, PlanChangeOutcome};
use crate::domain::{ManualPayment, Subscription, SubscriptionPlan};
use crate::error::AppResult;
use crate::http::extract::{AppJson, AppQuery};
use crate::http::server::AppState;
use crate::security::UserContext;

#[derive(Debug, Serialize)]
pub struct CurrentSubscription {
    pub subscription: Subscription,
    pub plan: SubscriptionPlan,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub plan_id: String,
}

pub async fn current(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> AppResult<Json<CurrentSubscription>> {
    let (subscription, plan) = state.billing.current_plan(&ctx.user_id)?;
    Ok(Json(CurrentSubscription { subscription, plan }))
}

pub async fn preview(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    AppQuery(query): AppQuery<PreviewQuery>,
) -> AppResult<Json<PlanChangePreview>> {
    Ok(Json(state.billing.preview_change(&ctx.user_id, &query.plan_id)?))
}

/// `200` when the plan was applied, `202` when it waits on payment.
pub async fn change(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    AppJson(body): AppJson<ChangePlanRequest>,
) -> AppResult<(StatusCode, Json<PlanChangeOutcome>)> {
    let outcome = state.billing.request_change(&ctx.user_id, body)?;
    let status = match outcome {
        PlanChangeOutcome::Applied { .. } => StatusCode::OK,
        _ => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

pub async fn cancel_pending(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> AppResult<Json<Subscription>> {
    Ok(Json(state.billing.cancel_pending(&ctx.user_id)?))
}

pub async fn payments(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Json<Vec<ManualPayment>> {
    Json(state.store.list_payments(Some(&ctx.user_id), None))
}
