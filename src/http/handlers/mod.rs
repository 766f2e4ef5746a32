//! Request handlers, grouped by audience.

pub mod accounts;
pub mod forms;
pub mod public;
pub mod subscriptions;
pub mod webhooks;
