//! formdesk: feedback forms with plan-limited, billed subscriptions.

pub mod admin;
pub mod billing;
pub mod config;
pub mod domain;
pub mod error;
pub mod forms;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod store;

pub use config::schema::AppConfig;
pub use error::{AppError, AppResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use store::Store;
