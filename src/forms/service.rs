//! Form CRUD, public submissions and usage accounting.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::billing::BillingService;
use crate::domain::form::{validate_answers, validate_definition};
use crate::domain::{Form, FormField, FormId, FormKind, FormStatus, PlanId, Submission, UserId};
use crate::error::{AppError, AppResult};
use crate::observability::metrics;
use crate::store::Store;

/// Body of form create and update requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: FormKind,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

/// Plan usage shown on the customer dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Usage {
    pub plan_id: PlanId,
    pub active_forms: usize,
    pub locked_forms: usize,
    pub form_limit: Option<u32>,
    pub submissions_in_window: usize,
    pub submission_limit: Option<u32>,
    pub window_start: DateTime<Utc>,
}

pub struct FormService {
    store: Arc<Store>,
    billing: Arc<BillingService>,
}

impl FormService {
    pub fn new(store: Arc<Store>, billing: Arc<BillingService>) -> Self {
        Self { store, billing }
    }

    /// A form owned by `user`. Other users' forms read as not found.
    pub fn get_form(&self, user: &UserId, id: &FormId) -> AppResult<Form> {
        self.store
            .get_form(id)
            .filter(|f| f.owner_id == *user)
            .ok_or(AppError::NotFound("form"))
    }

    pub fn list_forms(&self, user: &UserId) -> Vec<Form> {
        self.store.forms_by_owner(user)
    }

    /// Create an active form. The limit check and the insert run under the
    /// billing lock so concurrent requests cannot overshoot the plan.
    pub fn create_form(&self, user: &UserId, input: FormInput) -> AppResult<Form> {
        validate_definition(&input.title, &input.fields).map_err(AppError::Validation)?;

        let form = self.billing.with_lock(|| -> AppResult<Form> {
            let (_, plan) = self.billing.current_plan(user)?;
            let active = self
                .store
                .forms_by_owner(user)
                .iter()
                .filter(|f| f.is_active())
                .count();
            if let Some(limit) = plan.form_limit {
                if active >= limit as usize {
                    return Err(AppError::FormLimitReached { limit });
                }
            }

            let now = Utc::now();
            let form = Form {
                id: Uuid::new_v4(),
                owner_id: *user,
                title: input.title.trim().to_string(),
                description: input.description,
                kind: input.kind,
                fields: input.fields,
                status: FormStatus::Active,
                published: false,
                created_at: now,
                updated_at: now,
                locked_at: None,
            };
            self.store.insert_form(form.clone());
            Ok(form)
        })?;
        tracing::info!(user_id = %user, form_id = %form.id, "Form created");
        Ok(form)
    }

    pub fn update_form(&self, user: &UserId, id: &FormId, input: FormInput) -> AppResult<Form> {
        validate_definition(&input.title, &input.fields).map_err(AppError::Validation)?;
        self.edit_unlocked(user, id, |f| {
            f.title = input.title.trim().to_string();
            f.description = input.description;
            f.kind = input.kind;
            f.fields = input.fields;
        })
    }

    /// Share or unshare a form's public link.
    pub fn set_published(&self, user: &UserId, id: &FormId, published: bool) -> AppResult<Form> {
        self.edit_unlocked(user, id, |f| f.published = published)
    }

    /// Apply `edit` to an owned form unless it is locked. Reconciliation locks
    /// forms under the billing lock, so the check and the write share it.
    fn edit_unlocked(&self, user: &UserId, id: &FormId, edit: impl FnOnce(&mut Form)) -> AppResult<Form> {
        self.billing.with_lock(|| -> AppResult<Form> {
            let form = self.get_form(user, id)?;
            if form.is_locked() {
                return Err(AppError::FormLocked(form.id));
            }
            self.store
                .update_form(id, |f| {
                    edit(f);
                    f.updated_at = Utc::now();
                    f.clone()
                })
                .ok_or(AppError::NotFound("form"))
        })
    }

    /// Delete a form and its submissions. Locked forms may be deleted.
    pub fn delete_form(&self, user: &UserId, id: &FormId) -> AppResult<()> {
        self.get_form(user, id)?;
        self.store.delete_form(id);
        tracing::info!(user_id = %user, form_id = %id, "Form deleted");
        Ok(())
    }

    pub fn list_submissions(&self, user: &UserId, id: &FormId) -> AppResult<Vec<Submission>> {
        self.get_form(user, id)?;
        Ok(self.store.submissions_for_form(id))
    }

    /// A form as shown to respondents: published and active only.
    pub fn public_form(&self, id: &FormId) -> AppResult<Form> {
        self.store
            .get_form(id)
            .filter(|f| f.published && f.is_active())
            .ok_or(AppError::NotFound("form"))
    }

    /// Accept a respondent's answers.
    pub fn submit(&self, id: &FormId, answers: BTreeMap<String, Value>) -> AppResult<Submission> {
        let form = self.public_form(id)?;
        validate_answers(&form.fields, &answers).map_err(AppError::Validation)?;

        let submission = self.billing.with_lock(|| -> AppResult<Submission> {
            let now = Utc::now();
            let (sub, plan) = self.billing.current_plan(&form.owner_id)?;
            if let Some(limit) = plan.submission_limit {
                let used = self
                    .store
                    .count_submissions_since(&form.owner_id, sub.usage_window_start(now));
                if used >= limit as usize {
                    return Err(AppError::SubmissionLimitReached { limit });
                }
            }

            let submission = Submission {
                id: Uuid::new_v4(),
                form_id: form.id,
                owner_id: form.owner_id,
                answers,
                submitted_at: now,
            };
            self.store.insert_submission(submission.clone());
            Ok(submission)
        })?;
        metrics::record_submission();
        Ok(submission)
    }

    pub fn usage(&self, user: &UserId) -> AppResult<Usage> {
        let now = Utc::now();
        let (sub, plan) = self.billing.current_plan(user)?;
        let forms = self.store.forms_by_owner(user);
        let active_forms = forms.iter().filter(|f| f.is_active()).count();
        let window_start = sub.usage_window_start(now);

        Ok(Usage {
            plan_id: plan.id,
            active_forms,
            locked_forms: forms.len() - active_forms,
            form_limit: plan.form_limit,
            submissions_in_window: self.store.count_submissions_since(user, window_start),
            submission_limit: plan.submission_limit,
            window_start,
        })
    }
}
