use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use super::{FormId, PaymentId, PlanId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    /// A paid plan was requested from the free plan and awaits payment.
    PendingPayment,
    /// The provider reported a failed recurring charge.
    PastDue,
}

/// Who bills the current plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingSource {
    Free,
    Manual,
    Provider,
}

/// A requested plan change that has not been applied yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPlanChange {
    pub target_plan_id: PlanId,
    /// Forms the customer chose to keep active if the change locks forms.
    pub keep_form_ids: Vec<FormId>,
    pub payment_id: Option<PaymentId>,
    pub requested_at: DateTime<Utc>,
}

/// The single subscription record of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub source: BillingSource,
    pub provider_subscription_id: Option<String>,
    pub current_period_start: DateTime<Utc>,
    /// `None` for the free plan, which renews implicitly every month.
    pub current_period_end: Option<DateTime<Utc>>,
    pub pending_change: Option<PendingPlanChange>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A fresh subscription on the default plan.
    pub fn free(user_id: UserId, plan_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan_id: plan_id.to_string(),
            status: SubscriptionStatus::Active,
            source: BillingSource::Free,
            provider_subscription_id: None,
            current_period_start: now,
            current_period_end: None,
            pending_change: None,
            updated_at: now,
        }
    }

    /// Start of the window that submission limits are counted in.
    ///
    /// Billed periods use their own start. Without a period end the window
    /// rolls over on every monthly anniversary of `current_period_start`.
    pub fn usage_window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.current_period_end.is_some() {
            return self.current_period_start;
        }

        let mut start = self.current_period_start;
        let mut months = 1;
        while let Some(next) = self.current_period_start.checked_add_months(Months::new(months)) {
            if next > now {
                break;
            }
            start = next;
            months += 1;
        }
        start
    }
}
