//! Admin management of the plan catalogue.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::service::BillingService;
use crate::domain::{BillingInterval, PlanBilling, SubscriptionPlan};
use crate::error::{AppError, AppResult};

/// Editable plan fields. Used for both create (with `id`) and full update.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub form_limit: Option<u32>,
    #[serde(default)]
    pub submission_limit: Option<u32>,
    #[serde(default)]
    pub price_cents: u64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub interval: BillingInterval,
    #[serde(default)]
    pub provider_plan_id: Option<String>,
}

fn is_slug(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl BillingService {
    fn check_plan_input(&self, input: &PlanInput, plan_id: &str) -> AppResult<()> {
        if input.name.trim().is_empty() {
            return Err(AppError::Validation("plan name must not be empty".into()));
        }
        if let Some(provider_id) = &input.provider_plan_id {
            if provider_id.trim().is_empty() {
                return Err(AppError::Validation("provider_plan_id must not be empty".into()));
            }
            if let Some(other) = self.store().find_plan_by_provider_id(provider_id) {
                if other.id != plan_id {
                    return Err(AppError::Conflict(format!(
                        "provider plan '{}' is already mapped to '{}'",
                        provider_id, other.id
                    )));
                }
            }
        }
        if plan_id == self.default_plan_id() && input.price_cents > 0 {
            return Err(AppError::Validation("the default plan must stay free".into()));
        }
        Ok(())
    }

    fn build_plan(&self, id: String, input: PlanInput, created_at: chrono::DateTime<Utc>) -> SubscriptionPlan {
        let currency = input
            .currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| self.default_currency());
        SubscriptionPlan {
            id,
            name: input.name.trim().to_string(),
            form_limit: input.form_limit,
            submission_limit: input.submission_limit,
            price_cents: input.price_cents,
            currency,
            interval: input.interval,
            billing: match input.provider_plan_id {
                Some(provider_plan_id) => PlanBilling::Provider { provider_plan_id },
                None => PlanBilling::Manual,
            },
            archived: false,
            created_at,
        }
    }

    /// Plans customers can choose.
    pub fn offered_plans(&self) -> Vec<SubscriptionPlan> {
        self.store()
            .list_plans()
            .into_iter()
            .filter(|p| !p.archived)
            .collect()
    }

    pub fn create_plan(&self, input: PlanInput) -> AppResult<SubscriptionPlan> {
        let id = input
            .id
            .clone()
            .map(|id| id.trim().to_string())
            .ok_or_else(|| AppError::Validation("plan id is required".into()))?;
        if !is_slug(&id) {
            return Err(AppError::Validation(
                "plan id may only contain lowercase letters, digits, '-' and '_'".into(),
            ));
        }
        let _guard = self.guard();
        if self.store().get_plan(&id).is_some() {
            return Err(AppError::Conflict(format!("plan '{}' already exists", id)));
        }
        self.check_plan_input(&input, &id)?;

        let plan = self.build_plan(id, input, Utc::now());
        self.store().upsert_plan(plan.clone());
        tracing::info!(plan = %plan.id, "Plan created");
        Ok(plan)
    }

    /// Replace a plan's editable fields.
    ///
    /// Limit changes apply to subscribers at their next plan change; forms
    /// are not locked retroactively.
    pub fn update_plan(&self, id: &str, input: PlanInput) -> AppResult<SubscriptionPlan> {
        let _guard = self.guard();
        let existing = self.plan(id)?;
        self.check_plan_input(&input, id)?;

        let mut plan = self.build_plan(existing.id, input, existing.created_at);
        plan.archived = existing.archived;
        self.store().upsert_plan(plan.clone());
        tracing::info!(plan = %plan.id, "Plan updated");
        Ok(plan)
    }

    /// Withdraw a plan from sale. Existing subscribers keep it.
    pub fn archive_plan(&self, id: &str) -> AppResult<SubscriptionPlan> {
        if id == self.default_plan_id() {
            return Err(AppError::Conflict("the default plan cannot be archived".into()));
        }
        let _guard = self.guard();
        let mut plan = self.plan(id)?;
        plan.archived = true;
        self.store().upsert_plan(plan.clone());
        tracing::info!(plan = %plan.id, "Plan archived");
        Ok(plan)
    }
}
