//! Subscription billing.
//!
//! # Data Flow
//! ```text
//! customer plan change ─┐
//! manual payment review ┼→ service.rs ─→ reconcile.rs (which forms stay active)
//! provider webhook ─────┤      │
//!   (webhook.rs verify) │      └→ store: subscription, forms, payments, audit
//! expiry sweep ─────────┘
//! ```

pub mod catalogue;
pub mod reconcile;
pub mod service;
pub mod webhook;

pub use catalogue::PlanInput;
pub use reconcile::{ChangeKind, FormReconciliation, PlanChangeAssessment, SelectionError};
pub use service::{BillingService, ChangePlanRequest, PlanChangeOutcome, WebhookOutcome};
pub use webhook::{ProviderEvent, WebhookError};
