use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::service::PaymentDecision;
use crate::billing::{FormReconciliation, PlanInput};
use crate::domain::{
    AuditEntry, FormId, ManualPayment, PaymentId, PaymentStatus, PlanId, Subscription,
    SubscriptionPlan, User, UserId,
};
use crate::error::AppResult;
use crate::http::extract::{AppJson, AppPath, AppQuery};
use crate::http::server::AppState;
use crate::store::StoreCounts;

const DEFAULT_AUDIT_LIMIT: usize = 100;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub counts: StoreCounts,
    pub subscriptions_by_plan: Vec<(PlanId, usize)>,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub user: User,
    pub subscription: Option<Subscription>,
}

#[derive(Deserialize)]
pub struct SetPlan {
    pub plan_id: PlanId,
    #[serde(default)]
    pub keep_form_ids: Option<Vec<FormId>>,
}

#[derive(Serialize)]
pub struct PlanApplied {
    pub subscription: Subscription,
    pub reconciliation: FormReconciliation,
}

#[derive(Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
}

#[derive(Deserialize, Default)]
pub struct Decision {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<UserId>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SweepResult {
    pub expired: Vec<UserId>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        started_at: state.started_at,
        counts: state.store.counts(),
        subscriptions_by_plan: state.store.subscription_counts(),
    })
}

pub async fn list_users(State(state): State<AppState>) -> Json<Vec<UserSummary>> {
    let users = state
        .store
        .list_users()
        .into_iter()
        .map(|user| UserSummary {
            subscription: state.store.get_subscription(&user.id),
            user,
        })
        .collect();
    Json(users)
}

pub async fn delete_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<UserId>,
) -> AppResult<StatusCode> {
    state.billing.delete_account(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_user_plan(
    State(state): State<AppState>,
    AppPath(id): AppPath<UserId>,
    AppJson(body): AppJson<SetPlan>,
) -> AppResult<Json<PlanApplied>> {
    let (subscription, reconciliation) =
        state.billing.admin_set_plan(&id, &body.plan_id, body.keep_form_ids)?;
    Ok(Json(PlanApplied {
        subscription,
        reconciliation,
    }))
}

/// Every plan, archived ones included.
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<SubscriptionPlan>> {
    Json(state.store.list_plans())
}

pub async fn create_plan(
    State(state): State<AppState>,
    AppJson(body): AppJson<PlanInput>,
) -> AppResult<(StatusCode, Json<SubscriptionPlan>)> {
    let plan = state.billing.create_plan(body)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn update_plan(
    State(state): State<AppState>,
    AppPath(id): AppPath<PlanId>,
    AppJson(body): AppJson<PlanInput>,
) -> AppResult<Json<SubscriptionPlan>> {
    Ok(Json(state.billing.update_plan(&id, body)?))
}

pub async fn archive_plan(
    State(state): State<AppState>,
    AppPath(id): AppPath<PlanId>,
) -> AppResult<Json<SubscriptionPlan>> {
    Ok(Json(state.billing.archive_plan(&id)?))
}

pub async fn list_payments(
    State(state): State<AppState>,
    AppQuery(filter): AppQuery<PaymentFilter>,
) -> Json<Vec<ManualPayment>> {
    Json(state.store.list_payments(None, filter.status))
}

pub async fn approve_payment(
    State(state): State<AppState>,
    AppPath(id): AppPath<PaymentId>,
    AppJson(body): AppJson<Decision>,
) -> AppResult<Json<PaymentDecision>> {
    Ok(Json(state.billing.approve_payment(&id, body.note)?))
}

pub async fn reject_payment(
    State(state): State<AppState>,
    AppPath(id): AppPath<PaymentId>,
    AppJson(body): AppJson<Decision>,
) -> AppResult<Json<ManualPayment>> {
    Ok(Json(state.billing.reject_payment(&id, body.note)?))
}

pub async fn list_audit(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    Json(state.store.audit_entries(query.user_id.as_ref(), limit))
}

pub async fn sweep_subscriptions(State(state): State<AppState>) -> AppResult<Json<SweepResult>> {
    let expired = state.billing.sweep_expired(Utc::now())?;
    Ok(Json(SweepResult { expired }))
}
