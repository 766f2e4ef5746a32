//! Plan-change reconciliation.
//!
//! Decides which of a user's forms stay active when their plan changes.
//! Everything here is pure: callers load the forms, apply the returned
//! [`FormReconciliation`] and persist.
//!
//! Rules, for a target plan with form limit `n`:
//! - unlimited: every locked form is unlocked
//! - more than `n` active forms: keep the preferred active forms (in the
//!   order given, up to `n`), fill remaining slots with the most recent
//!   active forms, lock the rest
//! - at most `n` active forms: unlock the most recent locked forms into
//!   the free slots

use std::collections::HashSet;

use serde::Serialize;

use crate::domain::{Form, FormId, SubscriptionPlan};

/// Direction of a plan change, judged by form limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Upgrade,
    Downgrade,
    Lateral,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Upgrade => "upgrade",
            ChangeKind::Downgrade => "downgrade",
            ChangeKind::Lateral => "lateral",
        }
    }
}

/// Compare two form limits, `None` meaning unlimited.
pub fn classify(old_limit: Option<u32>, new_limit: Option<u32>) -> ChangeKind {
    match (old_limit, new_limit) {
        (None, None) => ChangeKind::Lateral,
        (Some(_), None) => ChangeKind::Upgrade,
        (None, Some(_)) => ChangeKind::Downgrade,
        (Some(old), Some(new)) if new > old => ChangeKind::Upgrade,
        (Some(old), Some(new)) if new < old => ChangeKind::Downgrade,
        _ => ChangeKind::Lateral,
    }
}

/// How a user's forms compare to a plan's form limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanChangeAssessment {
    pub active_forms: usize,
    pub locked_forms: usize,
    pub limit: Option<u32>,
    /// The customer must choose exactly `limit` forms to keep.
    pub requires_selection: bool,
    /// Active forms that would be locked without a selection.
    pub excess: usize,
}

pub fn assess(forms: &[Form], target: &SubscriptionPlan) -> PlanChangeAssessment {
    let active_forms = forms.iter().filter(|f| f.is_active()).count();
    let locked_forms = forms.len() - active_forms;
    let excess = match target.form_limit {
        Some(limit) => active_forms.saturating_sub(limit as usize),
        None => 0,
    };

    PlanChangeAssessment {
        active_forms,
        locked_forms,
        limit: target.form_limit,
        requires_selection: excess > 0,
        excess,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("select exactly {expected} forms to keep, got {got}")]
    WrongCount { expected: usize, got: usize },
    #[error("form {0} was selected more than once")]
    Duplicate(FormId),
    #[error("form {0} does not belong to this account")]
    UnknownForm(FormId),
    #[error("form {0} is not active")]
    NotActive(FormId),
}

/// Strict check of a customer's keep-list for a downgrade that needs one.
///
/// `forms` are the customer's forms; `limit` is the target plan's limit.
pub fn validate_selection(forms: &[Form], limit: u32, keep: &[FormId]) -> Result<(), SelectionError> {
    let expected = limit as usize;
    if keep.len() != expected {
        return Err(SelectionError::WrongCount {
            expected,
            got: keep.len(),
        });
    }

    let mut seen = HashSet::with_capacity(keep.len());
    for id in keep {
        if !seen.insert(*id) {
            return Err(SelectionError::Duplicate(*id));
        }
        match forms.iter().find(|f| f.id == *id) {
            None => return Err(SelectionError::UnknownForm(*id)),
            Some(f) if !f.is_active() => return Err(SelectionError::NotActive(*id)),
            Some(_) => {}
        }
    }

    Ok(())
}

/// Forms to lock and unlock to bring a user in line with a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormReconciliation {
    pub lock: Vec<FormId>,
    pub unlock: Vec<FormId>,
}

impl FormReconciliation {
    pub fn is_empty(&self) -> bool {
        self.lock.is_empty() && self.unlock.is_empty()
    }
}

/// Most recent first, id as tie-break so the order is total.
fn by_recency<'a>(forms: impl Iterator<Item = &'a Form>) -> Vec<&'a Form> {
    let mut sorted: Vec<&Form> = forms.collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    sorted
}

/// Compute the lock/unlock plan for `forms` under `limit`.
///
/// `preferred` lists forms to keep first when locking is needed. Ids that
/// are unknown or not active are skipped, so a keep-list chosen earlier
/// still applies after the customer has deleted some of those forms.
pub fn reconcile(forms: &[Form], limit: Option<u32>, preferred: &[FormId]) -> FormReconciliation {
    let Some(limit) = limit else {
        return FormReconciliation {
            lock: Vec::new(),
            unlock: by_recency(forms.iter().filter(|f| f.is_locked()))
                .into_iter()
                .map(|f| f.id)
                .collect(),
        };
    };
    let limit = limit as usize;

    let active: Vec<&Form> = forms.iter().filter(|f| f.is_active()).collect();

    if active.len() > limit {
        let mut keep: Vec<FormId> = Vec::with_capacity(limit);
        for id in preferred {
            if keep.len() == limit {
                break;
            }
            if active.iter().any(|f| f.id == *id) && !keep.contains(id) {
                keep.push(*id);
            }
        }
        for f in by_recency(active.iter().copied()) {
            if keep.len() == limit {
                break;
            }
            if !keep.contains(&f.id) {
                keep.push(f.id);
            }
        }

        let lock = by_recency(active.iter().copied())
            .into_iter()
            .filter(|f| !keep.contains(&f.id))
            .map(|f| f.id)
            .collect();

        return FormReconciliation {
            lock,
            unlock: Vec::new(),
        };
    }

    let free_slots = limit - active.len();
    FormReconciliation {
        lock: Vec::new(),
        unlock: by_recency(forms.iter().filter(|f| f.is_locked()))
            .into_iter()
            .take(free_slots)
            .map(|f| f.id)
            .collect(),
    }
}
