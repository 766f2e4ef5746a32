//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (default plan exists in the catalogue)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::AppConfig;
use crate::store::Store;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),
    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,
    #[error("admin.api_key must not be empty")]
    EmptyAdminKey,
    #[error("plan id must not be empty")]
    EmptyPlanId,
    #[error("duplicate plan id '{0}'")]
    DuplicatePlanId(String),
    #[error("duplicate provider plan id '{0}'")]
    DuplicateProviderPlanId(String),
    #[error("plan '{0}' has an empty provider_plan_id")]
    EmptyProviderPlanId(String),
    #[error("billing.default_plan must not be empty")]
    EmptyDefaultPlan,
    #[error("default plan '{0}' is not in the plan catalogue")]
    UnknownDefaultPlan(String),
    #[error("default plan '{0}' must be free")]
    PaidDefaultPlan(String),
    #[error("default plan '{0}' is archived")]
    ArchivedDefaultPlan(String),
    #[error("provider plan id '{0}' is already mapped to plan '{1}'")]
    ProviderPlanIdInUse(String, String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    if config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::EmptyAdminKey);
    }

    let mut ids = HashSet::new();
    let mut provider_ids = HashSet::new();
    for plan in &config.plans {
        if plan.id.trim().is_empty() {
            errors.push(ValidationError::EmptyPlanId);
        } else if !ids.insert(plan.id.as_str()) {
            errors.push(ValidationError::DuplicatePlanId(plan.id.clone()));
        }

        if let Some(provider_id) = &plan.provider_plan_id {
            if provider_id.trim().is_empty() {
                errors.push(ValidationError::EmptyProviderPlanId(plan.id.clone()));
            } else if !provider_ids.insert(provider_id.as_str()) {
                errors.push(ValidationError::DuplicateProviderPlanId(provider_id.clone()));
            }
        }
    }

    let default_plan = config.billing.default_plan.as_str();
    if default_plan.trim().is_empty() {
        errors.push(ValidationError::EmptyDefaultPlan);
    } else {
        match config.plans.iter().find(|p| p.id == default_plan) {
            None => errors.push(ValidationError::UnknownDefaultPlan(default_plan.to_string())),
            Some(plan) if plan.price_cents > 0 => {
                errors.push(ValidationError::PaidDefaultPlan(default_plan.to_string()))
            }
            Some(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check a reload candidate against the plans already in the store.
///
/// Seeding only adds missing plans, so a stored plan wins over its config
/// entry. The default plan must still resolve to a free, offered plan, and a
/// plan about to be seeded must not claim a provider id another plan holds.
pub fn validate_against_store(config: &AppConfig, store: &Store) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let default_plan = config.billing.default_plan.as_str();
    if let Some(stored) = store.get_plan(default_plan) {
        if stored.price_cents > 0 {
            errors.push(ValidationError::PaidDefaultPlan(default_plan.to_string()));
        }
        if stored.archived {
            errors.push(ValidationError::ArchivedDefaultPlan(default_plan.to_string()));
        }
    }

    for plan in &config.plans {
        if store.get_plan(&plan.id).is_some() {
            continue;
        }
        if let Some(provider_id) = &plan.provider_plan_id {
            if let Some(owner) = store.find_plan_by_provider_id(provider_id) {
                errors.push(ValidationError::ProviderPlanIdInUse(provider_id.clone(), owner.id));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
