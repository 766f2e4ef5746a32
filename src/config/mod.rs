//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via ArcSwap to handlers and services
//!
//! On file change:
//!     watcher.rs detects change (debounced, unchanged contents skipped)
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → validate_against_store checks it against the stored plans
//!     → atomic swap of Arc<AppConfig>
//!     → plan catalogue re-seeded (missing plans only)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AppConfig, BillingConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    PlanConfig, SecurityConfig, StoreConfig, TimeoutConfig,
};
