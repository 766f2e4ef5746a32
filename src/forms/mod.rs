//! Form and submission management with plan-limit enforcement.

pub mod service;

pub use service::{FormInput, FormService, Usage};
