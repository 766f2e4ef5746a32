//! Persisted document types.
//!
//! Every type here is a flat serde record stored by [`crate::store::Store`].
//! Ids are UUID v4 except plan ids, which are readable slugs shared with the
//! configuration file and the billing provider mapping.

pub mod audit;
pub mod form;
pub mod payment;
pub mod plan;
pub mod submission;
pub mod subscription;
pub mod user;

pub use audit::{Actor, AuditAction, AuditEntry};
pub use form::{FieldType, Form, FormField, FormKind, FormStatus};
pub use payment::{ManualPayment, PaymentStatus};
pub use plan::{BillingInterval, PlanBilling, SubscriptionPlan};
pub use submission::Submission;
pub use subscription::{BillingSource, PendingPlanChange, Subscription, SubscriptionStatus};
pub use user::User;

pub type UserId = uuid::Uuid;
pub type FormId = uuid::Uuid;
pub type SubmissionId = uuid::Uuid;
pub type PaymentId = uuid::Uuid;
pub type PlanId = String;
