//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (hardening response headers)
//!     → rate_limit.rs (per-IP token bucket on public submissions)
//!     → access_control.rs (resolve X-User-Id into a UserContext)
//!     → Pass to handlers
//! ```
//!
//! Admin routes are guarded separately by `admin::auth`.

pub mod access_control;
pub mod headers;
pub mod rate_limit;

pub use access_control::{require_user, UserContext, USER_ID_HEADER};
pub use rate_limit::{submission_rate_limit, RateLimiter};
