//! Subscription plan catalogue entries.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use super::PlanId;
use crate::config::PlanConfig;

/// Billing period length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn months(self) -> u32 {
        match self {
            BillingInterval::Monthly => 1,
            BillingInterval::Yearly => 12,
        }
    }

    /// End of a period starting at `start`.
    pub fn period_end(self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_months(Months::new(self.months()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// How a plan is paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanBilling {
    /// Priced outside the billing provider; payments are reviewed by an admin.
    Manual,
    /// Recurring billing through the provider.
    Provider { provider_plan_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: PlanId,
    pub name: String,
    /// Maximum active forms; `None` is unlimited.
    pub form_limit: Option<u32>,
    /// Maximum submissions per usage window; `None` is unlimited.
    pub submission_limit: Option<u32>,
    pub price_cents: u64,
    pub currency: String,
    pub interval: BillingInterval,
    pub billing: PlanBilling,
    /// Archived plans stay attached to existing subscriptions but cannot be chosen.
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    pub fn from_config(config: &PlanConfig, currency: &str) -> Self {
        let billing = match &config.provider_plan_id {
            Some(id) => PlanBilling::Provider {
                provider_plan_id: id.clone(),
            },
            None => PlanBilling::Manual,
        };

        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            form_limit: config.form_limit,
            submission_limit: config.submission_limit,
            price_cents: config.price_cents,
            currency: currency.to_string(),
            interval: config.interval,
            billing,
            archived: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    pub fn provider_plan_id(&self) -> Option<&str> {
        match &self.billing {
            PlanBilling::Provider { provider_plan_id } => Some(provider_plan_id),
            PlanBilling::Manual => None,
        }
    }
}
