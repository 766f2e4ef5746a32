//! HTTP API subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (assign x-request-id, open tracing span)
//!     → server.rs (timeouts, body limit, security headers, metrics)
//!     → security (rate limit / X-User-Id) or admin::auth
//!     → handlers/* → services → store
//! ```

pub mod extract;
pub mod handlers;
pub mod request;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
