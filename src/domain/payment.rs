use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PaymentId, PlanId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
    /// Withdrawn by the customer before review.
    Cancelled,
}

/// A payment made outside the billing provider, awaiting admin review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualPayment {
    pub id: PaymentId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub amount_cents: u64,
    pub currency: String,
    /// Customer-supplied reference (bank transfer id, receipt number).
    pub reference: String,
    pub status: PaymentStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl ManualPayment {
    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }
}
