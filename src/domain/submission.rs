use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FormId, SubmissionId, UserId};

/// A single response to a published form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub form_id: FormId,
    /// Denormalized from the form so usage can be counted per owner.
    pub owner_id: UserId,
    pub answers: BTreeMap<String, Value>,
    pub submitted_at: DateTime<Utc>,
}
