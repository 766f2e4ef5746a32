//! Plan-change workflow.
//!
//! Ties the pure rules in [`crate::billing::reconcile`] to billing state:
//! customer plan-change requests, manual payment review, provider webhooks
//! and expiry of lapsed manual subscriptions. Every transition that touches
//! more than one document runs under the service lock.

use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::reconcile::{
    assess, classify, reconcile, validate_selection, ChangeKind, FormReconciliation,
    PlanChangeAssessment,
};
use crate::billing::webhook::{ProviderEvent, ProviderEventKind};
use crate::config::AppConfig;
use crate::domain::user::is_plausible_email;
use crate::domain::{
    Actor, AuditAction, AuditEntry, BillingSource, FormId, ManualPayment, PaymentId,
    PaymentStatus, PendingPlanChange, PlanBilling, PlanId, Subscription, SubscriptionPlan,
    SubscriptionStatus, User, UserId,
};
use crate::error::{AppError, AppResult};
use crate::observability::metrics;
use crate::store::Store;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangePlanRequest {
    pub plan_id: PlanId,
    /// Forms to keep active; required when the target plan would lock forms.
    #[serde(default)]
    pub keep_form_ids: Option<Vec<FormId>>,
    /// Required for manual plans.
    #[serde(default)]
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanChangeOutcome {
    /// The new plan is in effect.
    Applied {
        subscription: Subscription,
        reconciliation: FormReconciliation,
    },
    /// A manual payment was recorded and awaits admin review.
    AwaitingPayment { payment: ManualPayment },
    /// The customer completes checkout with the provider; the webhook applies the plan.
    AwaitingProvider {
        provider_plan_id: String,
        customer_ref: UserId,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanChangePreview {
    pub current_plan: SubscriptionPlan,
    pub target_plan: SubscriptionPlan,
    pub kind: ChangeKind,
    pub assessment: PlanChangeAssessment,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentDecision {
    pub payment: ManualPayment,
    pub subscription: Subscription,
    pub reconciliation: FormReconciliation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        user_id: UserId,
        plan_id: PlanId,
        reconciliation: FormReconciliation,
    },
    PastDue {
        user_id: UserId,
    },
    Reverted {
        user_id: UserId,
        reconciliation: FormReconciliation,
    },
    Duplicate,
    Ignored,
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied { .. } => "applied",
            WebhookOutcome::PastDue { .. } => "past_due",
            WebhookOutcome::Reverted { .. } => "reverted",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Subscription and billing workflows.
pub struct BillingService {
    store: Arc<Store>,
    config: Arc<ArcSwap<AppConfig>>,
    lock: Mutex<()>,
}

impl BillingService {
    pub fn new(store: Arc<Store>, config: Arc<ArcSwap<AppConfig>>) -> Self {
        Self {
            store,
            config,
            lock: Mutex::new(()),
        }
    }

    pub(super) fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` under the same lock the billing workflows take.
    ///
    /// `f` must not call back into a locking `BillingService` method.
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.guard();
        f()
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn default_plan_id(&self) -> String {
        self.config.load().billing.default_plan.clone()
    }

    pub(crate) fn default_currency(&self) -> String {
        self.config.load().billing.currency.clone()
    }

    fn default_plan(&self) -> AppResult<SubscriptionPlan> {
        let id = self.default_plan_id();
        self.store.get_plan(&id).ok_or(AppError::NotFound("default plan"))
    }

    pub fn plan(&self, id: &str) -> AppResult<SubscriptionPlan> {
        self.store.get_plan(id).ok_or(AppError::NotFound("plan"))
    }

    pub fn subscription(&self, user: &UserId) -> AppResult<Subscription> {
        self.store
            .get_subscription(user)
            .ok_or(AppError::NotFound("subscription"))
    }

    /// The subscription together with the plan it is on.
    pub fn current_plan(&self, user: &UserId) -> AppResult<(Subscription, SubscriptionPlan)> {
        let sub = self.subscription(user)?;
        let plan = self.plan(&sub.plan_id)?;
        Ok((sub, plan))
    }

    fn audit(&self, actor: Actor, user: Option<UserId>, action: AuditAction) {
        self.store.append_audit(AuditEntry::new(actor, user, action));
    }

    // Accounts

    /// Register a user on the default plan.
    pub fn create_account(&self, email: &str, name: &str) -> AppResult<(User, Subscription)> {
        if !is_plausible_email(email.trim()) {
            return Err(AppError::Validation("a valid email is required".into()));
        }
        if name.trim().is_empty() {
            return Err(AppError::Validation("name must not be empty".into()));
        }

        let _guard = self.guard();
        if self.store.find_user_by_email(email).is_some() {
            return Err(AppError::Conflict("email is already registered".into()));
        }

        let plan = self.default_plan()?;
        let user = User::new(email, name);
        let sub = Subscription::free(user.id, &plan.id, user.created_at);
        self.store.insert_user(user.clone());
        self.store.put_subscription(sub.clone());

        tracing::info!(user_id = %user.id, plan = %plan.id, "Account created");
        Ok((user, sub))
    }

    /// Delete a user and everything they own.
    pub fn delete_account(&self, user: &UserId) -> AppResult<User> {
        let _guard = self.guard();
        let removed = self.store.delete_user(user).ok_or(AppError::NotFound("user"))?;
        self.audit(
            Actor::Admin,
            Some(removed.id),
            AuditAction::UserDeleted {
                email: removed.email.clone(),
            },
        );
        tracing::info!(user_id = %removed.id, "Account deleted");
        Ok(removed)
    }

    // Plan changes

    pub fn preview_change(&self, user: &UserId, plan_id: &str) -> AppResult<PlanChangePreview> {
        let (_, current_plan) = self.current_plan(user)?;
        let target_plan = self.plan(plan_id)?;
        let forms = self.store.forms_by_owner(user);

        Ok(PlanChangePreview {
            kind: classify(current_plan.form_limit, target_plan.form_limit),
            assessment: assess(&forms, &target_plan),
            current_plan,
            target_plan,
        })
    }

    /// Switch `sub` to `plan`, locking or unlocking the owner's forms.
    ///
    /// The caller sets status, source and period, then persists `sub`.
    fn apply_plan(
        &self,
        sub: &mut Subscription,
        plan: &SubscriptionPlan,
        preferred: &[FormId],
        actor: Actor,
        now: DateTime<Utc>,
    ) -> FormReconciliation {
        let user = sub.user_id;
        let from = sub.plan_id.clone();
        let old_limit = self.store.get_plan(&from).and_then(|p| p.form_limit);
        let kind = classify(old_limit, plan.form_limit);

        let forms = self.store.forms_by_owner(&user);
        let rec = reconcile(&forms, plan.form_limit, preferred);

        for id in &rec.lock {
            self.store.update_form(id, |f| f.lock(now));
        }
        for id in &rec.unlock {
            self.store.update_form(id, |f| f.unlock(now));
        }

        sub.plan_id = plan.id.clone();
        sub.updated_at = now;

        if from != plan.id {
            self.audit(
                actor.clone(),
                Some(user),
                AuditAction::PlanChanged {
                    from: from.clone(),
                    to: plan.id.clone(),
                    kind: kind.as_str().to_string(),
                },
            );
            metrics::record_plan_change(kind.as_str());
        }
        if !rec.lock.is_empty() {
            self.audit(
                actor.clone(),
                Some(user),
                AuditAction::FormsLocked {
                    form_ids: rec.lock.clone(),
                },
            );
        }
        if !rec.unlock.is_empty() {
            self.audit(
                actor,
                Some(user),
                AuditAction::FormsUnlocked {
                    form_ids: rec.unlock.clone(),
                },
            );
        }
        metrics::record_forms_locked(rec.lock.len());
        metrics::record_forms_unlocked(rec.unlock.len());

        tracing::info!(
            user_id = %user,
            from = %from,
            to = %plan.id,
            kind = kind.as_str(),
            locked = rec.lock.len(),
            unlocked = rec.unlock.len(),
            "Plan applied"
        );
        rec
    }

    /// Mark the payment linked to a discarded pending change as cancelled.
    fn cancel_linked_payment(&self, pending: &PendingPlanChange, now: DateTime<Utc>) {
        let Some(payment_id) = pending.payment_id else {
            return;
        };
        if let Some(mut payment) = self.store.get_payment(&payment_id) {
            if payment.is_pending() {
                payment.status = PaymentStatus::Cancelled;
                payment.decided_at = Some(now);
                self.store.put_payment(payment);
            }
        }
    }

    /// A customer asks to move to another plan.
    pub fn request_change(&self, user: &UserId, request: ChangePlanRequest) -> AppResult<PlanChangeOutcome> {
        let _guard = self.guard();
        let now = Utc::now();

        let (mut sub, current_plan) = self.current_plan(user)?;
        let target = self.plan(&request.plan_id)?;
        if target.archived {
            return Err(AppError::Validation(format!("plan '{}' is no longer offered", target.id)));
        }
        // A manually billed plan may be renewed early with a fresh payment.
        let renewing_manual = sub.source == BillingSource::Manual && target.billing == PlanBilling::Manual;
        if target.id == sub.plan_id && sub.status == SubscriptionStatus::Active && !renewing_manual {
            return Err(AppError::SamePlan);
        }
        if sub.pending_change.is_some() {
            return Err(AppError::PendingChangeExists);
        }

        let forms = self.store.forms_by_owner(user);
        let assessment = assess(&forms, &target);
        if let (true, Some(limit)) = (assessment.requires_selection, target.form_limit) {
            let keep = request.keep_form_ids.as_deref().ok_or(AppError::SelectionRequired {
                limit,
                active: assessment.active_forms,
            })?;
            validate_selection(&forms, limit, keep)?;
        }
        let keep = request.keep_form_ids.unwrap_or_default();

        if target.is_free() {
            let rec = self.apply_plan(&mut sub, &target, &keep, Actor::Customer(*user), now);
            sub.status = SubscriptionStatus::Active;
            sub.source = BillingSource::Free;
            sub.provider_subscription_id = None;
            sub.current_period_start = now;
            sub.current_period_end = None;
            self.store.put_subscription(sub.clone());
            return Ok(PlanChangeOutcome::Applied {
                subscription: sub,
                reconciliation: rec,
            });
        }

        let reference = request
            .payment_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        if target.billing == PlanBilling::Manual && reference.is_none() {
            return Err(AppError::Validation(
                "payment_reference is required for manual plans".into(),
            ));
        }

        self.audit(
            Actor::Customer(*user),
            Some(*user),
            AuditAction::PlanChangeRequested {
                from: sub.plan_id.clone(),
                to: target.id.clone(),
            },
        );

        match &target.billing {
            PlanBilling::Manual => {
                let payment = ManualPayment {
                    id: Uuid::new_v4(),
                    user_id: *user,
                    plan_id: target.id.clone(),
                    amount_cents: target.price_cents,
                    currency: target.currency.clone(),
                    reference: reference.unwrap_or_default().to_string(),
                    status: PaymentStatus::Pending,
                    note: None,
                    created_at: now,
                    decided_at: None,
                };
                self.store.put_payment(payment.clone());

                sub.pending_change = Some(PendingPlanChange {
                    target_plan_id: target.id.clone(),
                    keep_form_ids: keep,
                    payment_id: Some(payment.id),
                    requested_at: now,
                });
                if current_plan.is_free() {
                    sub.status = SubscriptionStatus::PendingPayment;
                }
                sub.updated_at = now;
                self.store.put_subscription(sub);

                self.audit(
                    Actor::Customer(*user),
                    Some(*user),
                    AuditAction::PaymentSubmitted {
                        payment_id: payment.id,
                        plan_id: target.id.clone(),
                    },
                );
                tracing::info!(user_id = %user, payment_id = %payment.id, plan = %target.id, "Manual payment submitted");
                Ok(PlanChangeOutcome::AwaitingPayment { payment })
            }
            PlanBilling::Provider { provider_plan_id } => {
                sub.pending_change = Some(PendingPlanChange {
                    target_plan_id: target.id.clone(),
                    keep_form_ids: keep,
                    payment_id: None,
                    requested_at: now,
                });
                sub.updated_at = now;
                self.store.put_subscription(sub);

                Ok(PlanChangeOutcome::AwaitingProvider {
                    provider_plan_id: provider_plan_id.clone(),
                    customer_ref: *user,
                })
            }
        }
    }

    /// Withdraw a pending plan change.
    pub fn cancel_pending(&self, user: &UserId) -> AppResult<Subscription> {
        let _guard = self.guard();
        let now = Utc::now();

        let mut sub = self.subscription(user)?;
        let pending = sub
            .pending_change
            .take()
            .ok_or(AppError::NotFound("pending plan change"))?;
        self.cancel_linked_payment(&pending, now);

        if sub.status == SubscriptionStatus::PendingPayment {
            sub.status = SubscriptionStatus::Active;
        }
        sub.updated_at = now;
        self.store.put_subscription(sub.clone());

        self.audit(
            Actor::Customer(*user),
            Some(*user),
            AuditAction::PlanChangeCancelled {
                target: pending.target_plan_id,
            },
        );
        Ok(sub)
    }

    // Manual payments

    fn pending_payment(&self, id: &PaymentId) -> AppResult<ManualPayment> {
        let payment = self.store.get_payment(id).ok_or(AppError::NotFound("payment"))?;
        if !payment.is_pending() {
            return Err(AppError::Conflict(format!(
                "payment is already {}",
                payment.status.as_str()
            )));
        }
        Ok(payment)
    }

    /// Admin confirms a manual payment; its plan takes effect.
    pub fn approve_payment(&self, id: &PaymentId, note: Option<String>) -> AppResult<PaymentDecision> {
        let _guard = self.guard();
        let now = Utc::now();

        let mut payment = self.pending_payment(id)?;
        let plan = self.plan(&payment.plan_id)?;
        let mut sub = self.subscription(&payment.user_id)?;

        let mut preferred = Vec::new();
        if let Some(pending) = &sub.pending_change {
            if pending.payment_id == Some(payment.id) {
                preferred = pending.keep_form_ids.clone();
                sub.pending_change = None;
            }
        }

        let renewing = sub.plan_id == plan.id && sub.source == BillingSource::Manual;
        let rec = self.apply_plan(&mut sub, &plan, &preferred, Actor::Admin, now);

        match sub.current_period_end.filter(|end| renewing && *end > now) {
            Some(end) => sub.current_period_end = Some(plan.interval.period_end(end)),
            None => {
                sub.current_period_start = now;
                sub.current_period_end = Some(plan.interval.period_end(now));
            }
        }
        sub.status = SubscriptionStatus::Active;
        sub.source = BillingSource::Manual;
        sub.provider_subscription_id = None;
        self.store.put_subscription(sub.clone());

        payment.status = PaymentStatus::Approved;
        payment.note = note;
        payment.decided_at = Some(now);
        self.store.put_payment(payment.clone());

        self.audit(
            Actor::Admin,
            Some(payment.user_id),
            AuditAction::PaymentApproved { payment_id: payment.id },
        );
        tracing::info!(payment_id = %payment.id, user_id = %payment.user_id, "Manual payment approved");

        Ok(PaymentDecision {
            payment,
            subscription: sub,
            reconciliation: rec,
        })
    }

    /// Admin rejects a manual payment; the plan stays as it was.
    pub fn reject_payment(&self, id: &PaymentId, note: Option<String>) -> AppResult<ManualPayment> {
        let _guard = self.guard();
        let now = Utc::now();

        let mut payment = self.pending_payment(id)?;
        if let Some(mut sub) = self.store.get_subscription(&payment.user_id) {
            if sub
                .pending_change
                .as_ref()
                .is_some_and(|p| p.payment_id == Some(payment.id))
            {
                sub.pending_change = None;
                if sub.status == SubscriptionStatus::PendingPayment {
                    sub.status = SubscriptionStatus::Active;
                }
                sub.updated_at = now;
                self.store.put_subscription(sub);
            }
        }

        payment.status = PaymentStatus::Rejected;
        payment.note = note;
        payment.decided_at = Some(now);
        self.store.put_payment(payment.clone());

        self.audit(
            Actor::Admin,
            Some(payment.user_id),
            AuditAction::PaymentRejected { payment_id: payment.id },
        );
        tracing::info!(payment_id = %payment.id, user_id = %payment.user_id, "Manual payment rejected");
        Ok(payment)
    }

    /// Admin override: apply a plan immediately.
    ///
    /// A keep-list is validated strictly when given; without one the most
    /// recent forms stay active.
    pub fn admin_set_plan(
        &self,
        user: &UserId,
        plan_id: &str,
        keep: Option<Vec<FormId>>,
    ) -> AppResult<(Subscription, FormReconciliation)> {
        let _guard = self.guard();
        let now = Utc::now();

        let mut sub = self.subscription(user)?;
        let plan = self.plan(plan_id)?;

        let forms = self.store.forms_by_owner(user);
        let assessment = assess(&forms, &plan);
        if let (true, Some(limit), Some(keep)) = (assessment.requires_selection, plan.form_limit, keep.as_deref()) {
            validate_selection(&forms, limit, keep)?;
        }

        if let Some(pending) = sub.pending_change.take() {
            self.cancel_linked_payment(&pending, now);
        }

        let rec = self.apply_plan(&mut sub, &plan, &keep.unwrap_or_default(), Actor::Admin, now);
        sub.status = SubscriptionStatus::Active;
        sub.provider_subscription_id = None;
        sub.current_period_start = now;
        if plan.is_free() {
            sub.source = BillingSource::Free;
            sub.current_period_end = None;
        } else {
            sub.source = BillingSource::Manual;
            sub.current_period_end = Some(plan.interval.period_end(now));
        }
        self.store.put_subscription(sub.clone());
        Ok((sub, rec))
    }

    // Provider webhooks

    /// Apply a verified provider event. Redelivered events are ignored.
    pub fn handle_provider_event(&self, event: &ProviderEvent) -> AppResult<WebhookOutcome> {
        let _guard = self.guard();
        let now = Utc::now();

        if !self.store.mark_event_processed(&event.id, now) {
            tracing::debug!(event_id = %event.id, "Duplicate webhook event");
            metrics::record_webhook("duplicate");
            return Ok(WebhookOutcome::Duplicate);
        }

        let result = self.apply_provider_event(event, now);
        match &result {
            Ok(outcome) => metrics::record_webhook(outcome.label()),
            Err(e) => {
                // Let the provider redeliver.
                self.store.unmark_event(&event.id);
                metrics::record_webhook("error");
                tracing::warn!(event_id = %event.id, error = %e, "Webhook event not applied");
            }
        }
        result
    }

    fn resolve_subscription(&self, event: &ProviderEvent) -> AppResult<Subscription> {
        if let Some(sub) = self
            .store
            .find_subscription_by_provider_id(&event.payload.subscription_id)
        {
            return Ok(sub);
        }
        event
            .payload
            .customer_ref
            .as_deref()
            .and_then(|r| r.parse::<UserId>().ok())
            .and_then(|id| self.store.get_subscription(&id))
            .ok_or(AppError::NotFound("subscription"))
    }

    fn apply_provider_event(&self, event: &ProviderEvent, now: DateTime<Utc>) -> AppResult<WebhookOutcome> {
        let provider_sub_id = event.payload.subscription_id.clone();

        match event.event {
            ProviderEventKind::SubscriptionActivated | ProviderEventKind::SubscriptionCharged => {
                let provider_plan_id = event
                    .payload
                    .plan_id
                    .as_deref()
                    .ok_or_else(|| AppError::Validation("event has no plan_id".into()))?;
                let plan = self
                    .store
                    .find_plan_by_provider_id(provider_plan_id)
                    .ok_or(AppError::NotFound("plan"))?;
                let mut sub = self.resolve_subscription(event)?;

                let mut preferred = Vec::new();
                if sub
                    .pending_change
                    .as_ref()
                    .is_some_and(|p| p.target_plan_id == plan.id)
                {
                    if let Some(pending) = sub.pending_change.take() {
                        preferred = pending.keep_form_ids;
                    }
                }

                let rec = self.apply_plan(&mut sub, &plan, &preferred, Actor::Provider, now);
                sub.status = SubscriptionStatus::Active;
                sub.source = BillingSource::Provider;
                sub.provider_subscription_id = Some(provider_sub_id);
                sub.current_period_start = now;
                sub.current_period_end = Some(event.period_end().unwrap_or_else(|| plan.interval.period_end(now)));
                self.store.put_subscription(sub.clone());

                Ok(WebhookOutcome::Applied {
                    user_id: sub.user_id,
                    plan_id: plan.id,
                    reconciliation: rec,
                })
            }
            ProviderEventKind::SubscriptionPending | ProviderEventKind::PaymentFailed => {
                let mut sub = self.resolve_subscription(event)?;
                if sub.provider_subscription_id.as_deref() != Some(provider_sub_id.as_str()) {
                    return Ok(WebhookOutcome::Ignored);
                }
                sub.status = SubscriptionStatus::PastDue;
                sub.updated_at = now;
                self.store.put_subscription(sub.clone());

                self.audit(
                    Actor::Provider,
                    Some(sub.user_id),
                    AuditAction::SubscriptionPastDue {
                        provider_subscription_id: provider_sub_id,
                    },
                );
                Ok(WebhookOutcome::PastDue { user_id: sub.user_id })
            }
            ProviderEventKind::SubscriptionHalted
            | ProviderEventKind::SubscriptionCancelled
            | ProviderEventKind::SubscriptionCompleted => {
                let mut sub = self.resolve_subscription(event)?;
                // A stale cancellation must not revert a newer subscription.
                if sub.source != BillingSource::Provider
                    || sub.provider_subscription_id.as_deref() != Some(provider_sub_id.as_str())
                {
                    return Ok(WebhookOutcome::Ignored);
                }

                let default = self.default_plan()?;
                let mut preferred = Vec::new();
                if sub
                    .pending_change
                    .as_ref()
                    .is_some_and(|p| p.target_plan_id == default.id)
                {
                    if let Some(pending) = sub.pending_change.take() {
                        preferred = pending.keep_form_ids;
                    }
                }

                let rec = self.apply_plan(&mut sub, &default, &preferred, Actor::Provider, now);
                sub.status = SubscriptionStatus::Active;
                sub.source = BillingSource::Free;
                sub.provider_subscription_id = None;
                sub.current_period_start = now;
                sub.current_period_end = None;
                self.store.put_subscription(sub.clone());

                self.audit(
                    Actor::Provider,
                    Some(sub.user_id),
                    AuditAction::SubscriptionCancelled {
                        provider_subscription_id: provider_sub_id,
                    },
                );
                Ok(WebhookOutcome::Reverted {
                    user_id: sub.user_id,
                    reconciliation: rec,
                })
            }
            ProviderEventKind::Unknown => {
                tracing::debug!(event_id = %event.id, "Ignoring unhandled webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    // Expiry

    /// Drop webhook event ids older than the configured retention.
    pub fn prune_webhook_events(&self, now: DateTime<Utc>) -> usize {
        let days = self.config.load().billing.event_retention_days.max(1);
        let pruned = self
            .store
            .prune_processed_events(now - chrono::Duration::days(i64::from(days)));
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned processed webhook events");
        }
        pruned
    }

    /// Move manual subscriptions whose period ended before `now` back to
    /// the default plan. Returns the affected users.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<UserId>> {
        let _guard = self.guard();
        let default = self.default_plan()?;
        let mut expired = Vec::new();

        for mut sub in self.store.list_subscriptions() {
            let lapsed = sub.source == BillingSource::Manual
                && sub.current_period_end.is_some_and(|end| end < now);
            if !lapsed {
                continue;
            }

            let old_plan = sub.plan_id.clone();
            let mut preferred = Vec::new();
            if sub
                .pending_change
                .as_ref()
                .is_some_and(|p| p.target_plan_id == default.id)
            {
                if let Some(pending) = sub.pending_change.take() {
                    preferred = pending.keep_form_ids;
                }
            }

            self.apply_plan(&mut sub, &default, &preferred, Actor::System, now);
            sub.status = SubscriptionStatus::Active;
            sub.source = BillingSource::Free;
            sub.current_period_start = now;
            sub.current_period_end = None;
            self.store.put_subscription(sub.clone());

            self.audit(
                Actor::System,
                Some(sub.user_id),
                AuditAction::SubscriptionExpired { plan_id: old_plan },
            );
            expired.push(sub.user_id);
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired manual subscriptions reverted");
        }
        Ok(expired)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::service;
    use super::*;
    use crate::domain::{Form, FormStatus};
    use crate::store::test_support::form;
    use chrono::Duration;

    fn add_forms(store: &Store, owner: UserId, count: i64) -> Vec<Form> {
        // Oldest first.
        (0..count)
            .map(|i| {
                let f = form(owner, (count - i) * 10, FormStatus::Active);
                store.insert_form(f.clone());
                f
            })
            .collect()
    }

    fn statuses(store: &Store, forms: &[Form]) -> Vec<FormStatus> {
        forms
            .iter()
            .map(|f| store.get_form(&f.id).unwrap().status)
            .collect()
    }

    fn request(plan: &str) -> ChangePlanRequest {
        ChangePlanRequest {
            plan_id: plan.into(),
            keep_form_ids: None,
            payment_reference: None,
        }
    }

    fn event(id: &str, kind: ProviderEventKind, plan: Option<&str>, customer: Option<UserId>) -> ProviderEvent {
        ProviderEvent {
            id: id.into(),
            event: kind,
            created_at: 0,
            payload: crate::billing::webhook::ProviderEventPayload {
                subscription_id: "sub_123".into(),
                plan_id: plan.map(str::to_string),
                customer_ref: customer.map(|c| c.to_string()),
                current_end: None,
            },
        }
    }

    /// Put a user on `plan` through the admin override.
    fn on_plan(service: &BillingService, user: &UserId, plan: &str) {
        service.admin_set_plan(user, plan, None).unwrap();
    }

    #[test]
    fn test_create_account_uses_default_plan() {
        let (service, _) = service();
        let (user, sub) = service.create_account("eve@example.com", "Eve").unwrap();
        assert_eq!(sub.user_id, user.id);
        assert_eq!(sub.plan_id, "free");
        assert_eq!(sub.source, BillingSource::Free);

        assert!(matches!(
            service.create_account("EVE@example.com", "Eve 2"),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(service.create_account("nope", "x"), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_downgrade_requires_exact_selection() {
        let (service, store) = service();
        let (user, _) = service.create_account("a@example.com", "A").unwrap();
        on_plan(&service, &user.id, "starter");
        let forms = add_forms(&store, user.id, 3);

        let err = service.request_change(&user.id, request("free")).unwrap_err();
        assert!(matches!(err, AppError::SelectionRequired { limit: 1, active: 3 }));

        let mut req = request("free");
        req.keep_form_ids = Some(vec![forms[0].id, forms[1].id]);
        assert!(matches!(
            service.request_change(&user.id, req).unwrap_err(),
            AppError::Selection(_)
        ));

        let mut req = request("free");
        req.keep_form_ids = Some(vec![forms[0].id]);
        let outcome = service.request_change(&user.id, req).unwrap();
        let PlanChangeOutcome::Applied { subscription, reconciliation } = outcome else {
            panic!("free downgrade applies immediately");
        };
        assert_eq!(subscription.plan_id, "free");
        assert_eq!(reconciliation.lock.len(), 2);
        assert_eq!(
            statuses(&store, &forms),
            vec![FormStatus::Active, FormStatus::Locked, FormStatus::Locked]
        );
    }

    #[test]
    fn test_manual_upgrade_unlocks_after_approval() {
        let (service, store) = service();
        let (user, _) = service.create_account("b@example.com", "B").unwrap();
        let forms = add_forms(&store, user.id, 3);
        // Free plan allows one: the newest stays.
        on_plan(&service, &user.id, "free");
        assert_eq!(
            statuses(&store, &forms),
            vec![FormStatus::Locked, FormStatus::Locked, FormStatus::Active]
        );

        let mut req = request("starter");
        let err = service.request_change(&user.id, req.clone()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        req.payment_reference = Some("TRX-001".into());
        let PlanChangeOutcome::AwaitingPayment { payment } = service.request_change(&user.id, req).unwrap() else {
            panic!("manual plan awaits payment");
        };
        assert_eq!(payment.amount_cents, 900);
        let sub = service.subscription(&user.id).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PendingPayment);
        assert_eq!(sub.plan_id, "free");

        let decision = service.approve_payment(&payment.id, Some("ok".into())).unwrap();
        assert_eq!(decision.payment.status, PaymentStatus::Approved);
        assert_eq!(decision.subscription.plan_id, "starter");
        assert_eq!(decision.subscription.status, SubscriptionStatus::Active);
        assert!(decision.subscription.current_period_end.is_some());
        assert_eq!(decision.reconciliation.unlock.len(), 2);
        assert!(statuses(&store, &forms).iter().all(|s| *s == FormStatus::Active));

        assert!(matches!(
            service.approve_payment(&payment.id, None),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_reject_payment_keeps_plan() {
        let (service, _) = service();
        let (user, _) = service.create_account("c@example.com", "C").unwrap();
        let mut req = request("starter");
        req.payment_reference = Some("TRX-2".into());
        let PlanChangeOutcome::AwaitingPayment { payment } = service.request_change(&user.id, req).unwrap() else {
            panic!("manual plan awaits payment");
        };

        let rejected = service.reject_payment(&payment.id, Some("no funds".into())).unwrap();
        assert_eq!(rejected.status, PaymentStatus::Rejected);
        let sub = service.subscription(&user.id).unwrap();
        assert_eq!(sub.plan_id, "free");
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.pending_change.is_none());
    }

    #[test]
    fn test_pending_change_blocks_and_cancels() {
        let (service, store) = service();
        let (user, _) = service.create_account("d@example.com", "D").unwrap();
        let mut req = request("starter");
        req.payment_reference = Some("TRX-3".into());
        let PlanChangeOutcome::AwaitingPayment { payment } = service.request_change(&user.id, req).unwrap() else {
            panic!("manual plan awaits payment");
        };

        assert!(matches!(
            service.request_change(&user.id, request("pro")),
            Err(AppError::PendingChangeExists)
        ));

        let sub = service.cancel_pending(&user.id).unwrap();
        assert!(sub.pending_change.is_none());
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(store.get_payment(&payment.id).unwrap().status, PaymentStatus::Cancelled);
        assert!(matches!(service.cancel_pending(&user.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_same_plan_and_archived_plan_rejected() {
        let (service, store) = service();
        let (user, _) = service.create_account("f@example.com", "F").unwrap();
        assert!(matches!(
            service.request_change(&user.id, request("free")),
            Err(AppError::SamePlan)
        ));

        let mut pro = store.get_plan("pro").unwrap();
        pro.archived = true;
        store.upsert_plan(pro);
        assert!(matches!(
            service.request_change(&user.id, request("pro")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_same_plan_reported_before_pending_change() {
        let (service, _) = service();
        let (user, _) = service.create_account("s@example.com", "S").unwrap();
        on_plan(&service, &user.id, "pro");

        let mut req = request("starter");
        req.payment_reference = Some("TRX-9".into());
        service.request_change(&user.id, req).unwrap();

        assert!(matches!(
            service.request_change(&user.id, request("pro")),
            Err(AppError::SamePlan)
        ));
        assert!(matches!(
            service.request_change(&user.id, request("business")),
            Err(AppError::PendingChangeExists)
        ));
    }

    #[test]
    fn test_provider_downgrade_uses_pending_selection() {
        let (service, store) = service();
        let (user, _) = service.create_account("g@example.com", "G").unwrap();
        on_plan(&service, &user.id, "business");
        let forms = add_forms(&store, user.id, 30);

        // Activate pro through the provider first.
        let out = service
            .handle_provider_event(&event("evt_a", ProviderEventKind::SubscriptionActivated, Some("plan_business_yearly"), Some(user.id)))
            .unwrap();
        assert!(matches!(out, WebhookOutcome::Applied { .. }));

        let keep: Vec<FormId> = forms.iter().take(25).map(|f| f.id).collect();
        let mut req = request("pro");
        req.keep_form_ids = Some(keep.clone());
        let outcome = service.request_change(&user.id, req).unwrap();
        assert!(matches!(outcome, PlanChangeOutcome::AwaitingProvider { ref provider_plan_id, .. } if provider_plan_id == "plan_pro_monthly"));

        let out = service
            .handle_provider_event(&event("evt_b", ProviderEventKind::SubscriptionCharged, Some("plan_pro_monthly"), None))
            .unwrap();
        let WebhookOutcome::Applied { plan_id, reconciliation, .. } = out else {
            panic!("charge applies the plan");
        };
        assert_eq!(plan_id, "pro");
        // The five newest were not selected.
        let newest: Vec<FormId> = forms.iter().rev().take(5).map(|f| f.id).collect();
        let mut locked = reconciliation.lock.clone();
        locked.sort();
        let mut expected = newest.clone();
        expected.sort();
        assert_eq!(locked, expected);

        let sub = service.subscription(&user.id).unwrap();
        assert_eq!(sub.source, BillingSource::Provider);
        assert_eq!(sub.provider_subscription_id.as_deref(), Some("sub_123"));
        assert!(sub.pending_change.is_none());
    }

    #[test]
    fn test_webhook_idempotency_and_errors() {
        let (service, _) = service();
        let (user, _) = service.create_account("h@example.com", "H").unwrap();
        let ev = event("evt_1", ProviderEventKind::SubscriptionActivated, Some("plan_pro_monthly"), Some(user.id));

        assert!(matches!(service.handle_provider_event(&ev).unwrap(), WebhookOutcome::Applied { .. }));
        assert_eq!(service.handle_provider_event(&ev).unwrap(), WebhookOutcome::Duplicate);

        // Unknown plan fails and can be redelivered.
        let bad = event("evt_2", ProviderEventKind::SubscriptionCharged, Some("plan_missing"), Some(user.id));
        assert!(service.handle_provider_event(&bad).is_err());
        assert!(service.handle_provider_event(&bad).is_err());

        let unknown = event("evt_3", ProviderEventKind::Unknown, None, None);
        assert_eq!(service.handle_provider_event(&unknown).unwrap(), WebhookOutcome::Ignored);
    }

    #[test]
    fn test_prune_webhook_events_after_retention() {
        let (service, _) = service();
        let (user, _) = service.create_account("p@example.com", "P").unwrap();
        let ev = event("evt_keep", ProviderEventKind::SubscriptionActivated, Some("plan_pro_monthly"), Some(user.id));
        service.handle_provider_event(&ev).unwrap();

        assert_eq!(service.prune_webhook_events(Utc::now() + Duration::days(29)), 0);
        assert_eq!(service.handle_provider_event(&ev).unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(service.prune_webhook_events(Utc::now() + Duration::days(31)), 1);
    }

    #[test]
    fn test_payment_failure_then_cancellation() {
        let (service, store) = service();
        let (user, _) = service.create_account("i@example.com", "I").unwrap();
        let forms = add_forms(&store, user.id, 3);
        service
            .handle_provider_event(&event("e1", ProviderEventKind::SubscriptionActivated, Some("plan_pro_monthly"), Some(user.id)))
            .unwrap();

        let out = service
            .handle_provider_event(&event("e2", ProviderEventKind::PaymentFailed, None, None))
            .unwrap();
        assert_eq!(out, WebhookOutcome::PastDue { user_id: user.id });
        assert_eq!(service.subscription(&user.id).unwrap().status, SubscriptionStatus::PastDue);
        assert!(statuses(&store, &forms).iter().all(|s| *s == FormStatus::Active));

        let out = service
            .handle_provider_event(&event("e3", ProviderEventKind::SubscriptionCancelled, None, None))
            .unwrap();
        assert!(matches!(out, WebhookOutcome::Reverted { .. }));
        let sub = service.subscription(&user.id).unwrap();
        assert_eq!(sub.plan_id, "free");
        assert_eq!(sub.source, BillingSource::Free);
        assert_eq!(
            statuses(&store, &forms),
            vec![FormStatus::Locked, FormStatus::Locked, FormStatus::Active]
        );

        // A late cancellation for the old subscription is ignored.
        let out = service
            .handle_provider_event(&event("e4", ProviderEventKind::SubscriptionHalted, None, Some(user.id)))
            .unwrap();
        assert_eq!(out, WebhookOutcome::Ignored);
    }

    #[test]
    fn test_sweep_reverts_lapsed_manual_plans() {
        let (service, store) = service();
        let (user, _) = service.create_account("j@example.com", "J").unwrap();
        on_plan(&service, &user.id, "starter");
        add_forms(&store, user.id, 2);

        assert!(service.sweep_expired(Utc::now()).unwrap().is_empty());

        let later = Utc::now() + Duration::days(40);
        assert_eq!(service.sweep_expired(later).unwrap(), vec![user.id]);
        let sub = service.subscription(&user.id).unwrap();
        assert_eq!(sub.plan_id, "free");
        assert_eq!(store.counts().locked_forms, 1);
        assert!(store
            .audit_entries(Some(&user.id), 10)
            .iter()
            .any(|e| matches!(e.action, AuditAction::SubscriptionExpired { .. })));
    }

    #[test]
    fn test_manual_renewal_extends_period() {
        let (service, _) = service();
        let (user, _) = service.create_account("k@example.com", "K").unwrap();
        on_plan(&service, &user.id, "starter");
        let before = service.subscription(&user.id).unwrap().current_period_end.unwrap();

        let mut req = request("starter");
        req.payment_reference = Some("RENEW-1".into());
        let PlanChangeOutcome::AwaitingPayment { payment } = service.request_change(&user.id, req).unwrap() else {
            panic!("renewal awaits payment");
        };
        // Still active on the paid plan while the renewal is reviewed.
        assert_eq!(service.subscription(&user.id).unwrap().status, SubscriptionStatus::Active);

        let decision = service.approve_payment(&payment.id, None).unwrap();
        assert!(decision.subscription.current_period_end.unwrap() > before + Duration::days(27));
    }
}
