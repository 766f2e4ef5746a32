//! Audit trail of billing and plan decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FormId, PaymentId, PlanId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Customer(UserId),
    Admin,
    Provider,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuditAction {
    PlanChangeRequested { from: PlanId, to: PlanId },
    PlanChangeCancelled { target: PlanId },
    PlanChanged { from: PlanId, to: PlanId, kind: String },
    FormsLocked { form_ids: Vec<FormId> },
    FormsUnlocked { form_ids: Vec<FormId> },
    PaymentSubmitted { payment_id: PaymentId, plan_id: PlanId },
    PaymentApproved { payment_id: PaymentId },
    PaymentRejected { payment_id: PaymentId },
    SubscriptionPastDue { provider_subscription_id: String },
    SubscriptionCancelled { provider_subscription_id: String },
    SubscriptionExpired { plan_id: PlanId },
    UserDeleted { email: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub actor: Actor,
    pub user_id: Option<UserId>,
    #[serde(flatten)]
    pub action: AuditAction,
}

impl AuditEntry {
    pub fn new(actor: Actor, user_id: Option<UserId>, action: AuditAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            actor,
            user_id,
            action,
        }
    }
}
