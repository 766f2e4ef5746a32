//! In-process document store.
//!
//! # Responsibilities
//! - Hold one concurrent map per collection (users, forms, submissions,
//!   plans, subscriptions, payments)
//! - Keep the append-only audit trail
//! - Remember processed webhook event ids for idempotency
//! - Cascade deletes (user → forms, submissions, subscription, payments)
//!
//! # Design Decisions
//! - DashMap per collection; no cross-collection transactions
//! - Multi-document workflows are serialised by the billing service
//! - Persistence is a whole-store JSON snapshot (see `snapshot.rs`)

pub mod snapshot;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::PlanConfig;
use crate::domain::{
    AuditEntry, Form, FormId, ManualPayment, PaymentId, PaymentStatus, PlanId, Submission,
    SubmissionId, Subscription, SubscriptionPlan, User, UserId,
};
use crate::domain::user::normalize_email;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// The document store shared by all services.
#[derive(Default)]
pub struct Store {
    users: DashMap<UserId, User>,
    forms: DashMap<FormId, Form>,
    submissions: DashMap<SubmissionId, Submission>,
    plans: DashMap<PlanId, SubscriptionPlan>,
    subscriptions: DashMap<UserId, Subscription>,
    payments: DashMap<PaymentId, ManualPayment>,
    audit: Mutex<Vec<AuditEntry>>,
    processed_events: DashMap<String, DateTime<Utc>>,
    snapshot_path: Option<PathBuf>,
}

impl Store {
    /// Create an empty store. `snapshot_path` enables `save_to_file`.
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        Self {
            snapshot_path,
            ..Self::default()
        }
    }

    // Users

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn get_user(&self, id: &UserId) -> Option<User> {
        self.users.get(id).map(|r| r.value().clone())
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let email = normalize_email(email);
        self.users
            .iter()
            .find(|r| r.value().email == email)
            .map(|r| r.value().clone())
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|r| r.value().clone()).collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        users
    }

    /// Remove a user and everything they own. Audit entries are kept.
    pub fn delete_user(&self, id: &UserId) -> Option<User> {
        let (_, user) = self.users.remove(id)?;
        self.forms.retain(|_, f| f.owner_id != *id);
        self.submissions.retain(|_, s| s.owner_id != *id);
        self.subscriptions.remove(id);
        self.payments.retain(|_, p| p.user_id != *id);
        Some(user)
    }

    // Forms

    pub fn insert_form(&self, form: Form) {
        self.forms.insert(form.id, form);
    }

    pub fn get_form(&self, id: &FormId) -> Option<Form> {
        self.forms.get(id).map(|r| r.value().clone())
    }

    /// Apply `f` to a stored form. Returns `None` if it does not exist.
    pub fn update_form<R>(&self, id: &FormId, f: impl FnOnce(&mut Form) -> R) -> Option<R> {
        self.forms.get_mut(id).map(|mut r| f(r.value_mut()))
    }

    /// Forms owned by `owner`, newest first.
    pub fn forms_by_owner(&self, owner: &UserId) -> Vec<Form> {
        let mut forms: Vec<Form> = self
            .forms
            .iter()
            .filter(|r| r.value().owner_id == *owner)
            .map(|r| r.value().clone())
            .collect();
        forms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        forms
    }

    /// Remove a form and its submissions.
    pub fn delete_form(&self, id: &FormId) -> Option<Form> {
        let (_, form) = self.forms.remove(id)?;
        self.submissions.retain(|_, s| s.form_id != *id);
        Some(form)
    }

    // Submissions

    pub fn insert_submission(&self, submission: Submission) {
        self.submissions.insert(submission.id, submission);
    }

    /// Submissions of one form, newest first.
    pub fn submissions_for_form(&self, form_id: &FormId) -> Vec<Submission> {
        let mut subs: Vec<Submission> = self
            .submissions
            .iter()
            .filter(|r| r.value().form_id == *form_id)
            .map(|r| r.value().clone())
            .collect();
        subs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        subs
    }

    /// Number of submissions received by `owner`'s forms since `since`.
    pub fn count_submissions_since(&self, owner: &UserId, since: DateTime<Utc>) -> usize {
        self.submissions
            .iter()
            .filter(|r| r.value().owner_id == *owner && r.value().submitted_at >= since)
            .count()
    }

    // Plans

    pub fn upsert_plan(&self, plan: SubscriptionPlan) {
        self.plans.insert(plan.id.clone(), plan);
    }

    pub fn get_plan(&self, id: &str) -> Option<SubscriptionPlan> {
        self.plans.get(id).map(|r| r.value().clone())
    }

    pub fn find_plan_by_provider_id(&self, provider_plan_id: &str) -> Option<SubscriptionPlan> {
        self.plans
            .iter()
            .find(|r| r.value().provider_plan_id() == Some(provider_plan_id))
            .map(|r| r.value().clone())
    }

    /// All plans, cheapest first.
    pub fn list_plans(&self) -> Vec<SubscriptionPlan> {
        let mut plans: Vec<SubscriptionPlan> = self.plans.iter().map(|r| r.value().clone()).collect();
        plans.sort_by(|a, b| a.price_cents.cmp(&b.price_cents).then(a.id.cmp(&b.id)));
        plans
    }

    /// Insert configured plans that are not in the catalogue yet.
    ///
    /// Existing plans are never overwritten so admin edits survive restarts.
    /// Returns the ids that were inserted.
    pub fn seed_plans(&self, plans: &[PlanConfig], currency: &str) -> Vec<PlanId> {
        let mut inserted = Vec::new();
        for config in plans {
            if !self.plans.contains_key(&config.id) {
                self.plans.insert(
                    config.id.clone(),
                    SubscriptionPlan::from_config(config, currency),
                );
                inserted.push(config.id.clone());
            }
        }
        inserted
    }

    // Subscriptions

    pub fn put_subscription(&self, subscription: Subscription) {
        self.subscriptions.insert(subscription.user_id, subscription);
    }

    pub fn get_subscription(&self, user: &UserId) -> Option<Subscription> {
        self.subscriptions.get(user).map(|r| r.value().clone())
    }

    pub fn find_subscription_by_provider_id(&self, provider_subscription_id: &str) -> Option<Subscription> {
        self.subscriptions
            .iter()
            .find(|r| r.value().provider_subscription_id.as_deref() == Some(provider_subscription_id))
            .map(|r| r.value().clone())
    }

    pub fn list_subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.iter().map(|r| r.value().clone()).collect()
    }

    /// Number of subscriptions per plan id.
    pub fn subscription_counts(&self) -> Vec<(PlanId, usize)> {
        let mut counts: std::collections::BTreeMap<PlanId, usize> = Default::default();
        for r in self.subscriptions.iter() {
            *counts.entry(r.value().plan_id.clone()).or_default() += 1;
        }
        counts.into_iter().collect()
    }

    // Payments

    pub fn put_payment(&self, payment: ManualPayment) {
        self.payments.insert(payment.id, payment);
    }

    pub fn get_payment(&self, id: &PaymentId) -> Option<ManualPayment> {
        self.payments.get(id).map(|r| r.value().clone())
    }

    /// Payments, newest first, optionally filtered by user and status.
    pub fn list_payments(&self, user: Option<&UserId>, status: Option<PaymentStatus>) -> Vec<ManualPayment> {
        let mut payments: Vec<ManualPayment> = self
            .payments
            .iter()
            .filter(|r| user.map_or(true, |u| r.value().user_id == *u))
            .filter(|r| status.map_or(true, |s| r.value().status == s))
            .map(|r| r.value().clone())
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        payments
    }

    // Audit

    pub fn append_audit(&self, entry: AuditEntry) {
        self.audit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// Newest entries first.
    pub fn audit_entries(&self, user: Option<&UserId>, limit: usize) -> Vec<AuditEntry> {
        let audit = self.audit.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        audit
            .iter()
            .rev()
            .filter(|e| user.map_or(true, |u| e.user_id.as_ref() == Some(u)))
            .take(limit)
            .cloned()
            .collect()
    }

    // Webhook idempotency

    /// Record an event id. Returns `false` if it was already processed.
    pub fn mark_event_processed(&self, event_id: &str, at: DateTime<Utc>) -> bool {
        match self.processed_events.entry(event_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(at);
                true
            }
        }
    }

    /// Forget an event id so it can be redelivered after a failed handling attempt.
    pub fn unmark_event(&self, event_id: &str) {
        self.processed_events.remove(event_id);
    }

    /// Forget event ids recorded before `cutoff`. Returns how many were dropped.
    pub fn prune_processed_events(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.processed_events.len();
        self.processed_events.retain(|_, seen| *seen >= cutoff);
        before.saturating_sub(self.processed_events.len())
    }

    /// Summary counts for the admin status endpoint.
    pub fn counts(&self) -> StoreCounts {
        let owners: HashSet<UserId> = self.forms.iter().map(|r| r.value().owner_id).collect();
        StoreCounts {
            users: self.users.len(),
            forms: self.forms.len(),
            locked_forms: self.forms.iter().filter(|r| r.value().is_locked()).count(),
            form_owners: owners.len(),
            submissions: self.submissions.len(),
            pending_payments: self.payments.iter().filter(|r| r.value().is_pending()).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreCounts {
    pub users: usize,
    pub forms: usize,
    pub locked_forms: usize,
    pub form_owners: usize,
    pub submissions: usize,
    pub pending_payments: usize,
}
