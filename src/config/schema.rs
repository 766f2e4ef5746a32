//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::domain::plan::BillingInterval;

/// Root configuration for the formdesk server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Billing and webhook settings.
    pub billing: BillingConfig,

    /// Document store persistence.
    pub store: StoreConfig,

    pub security: SecurityConfig,

    /// Plan catalogue seeded into the store on startup and reload.
    pub plans: Vec<PlanConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
            billing: BillingConfig::default(),
            store: StoreConfig::default(),
            security: SecurityConfig::default(),
            plans: default_plans(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `pretty` for development, `json` for production.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Billing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Shared secret for the billing provider's webhook signatures.
    /// Empty rejects every webhook.
    pub webhook_secret: String,

    /// Plan id every user falls back to (must be free).
    pub default_plan: String,

    /// Interval between sweeps of lapsed manual subscriptions, in seconds.
    pub expiry_sweep_secs: u64,

    /// Currency for manual payments.
    pub currency: String,

    /// Days a processed webhook event id is remembered for deduplication.
    pub event_retention_days: u32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            default_plan: "free".to_string(),
            expiry_sweep_secs: 3600,
            currency: "USD".to_string(),
            event_retention_days: 30,
        }
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file. `None` keeps everything in memory.
    pub snapshot_path: Option<String>,

    /// How often the snapshot is flushed, in seconds.
    pub flush_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            flush_interval_secs: 60,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,
    /// Maximum body size in bytes.
    pub max_body_size: usize,
    /// Public submissions allowed per second per client IP.
    pub submission_rps: u32,
    /// Burst capacity for public submissions.
    pub submission_burst: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 1024 * 1024, // 1MB
            submission_rps: 2,
            submission_burst: 10,
        }
    }
}

/// A plan seeded into the catalogue.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanConfig {
    /// Plan slug (e.g., "free", "pro").
    pub id: String,

    /// Display name.
    pub name: String,

    /// Maximum active forms. Omitted means unlimited.
    #[serde(default)]
    pub form_limit: Option<u32>,

    /// Maximum submissions per billing window. Omitted means unlimited.
    #[serde(default)]
    pub submission_limit: Option<u32>,

    /// Price per interval in minor units.
    #[serde(default)]
    pub price_cents: u64,

    #[serde(default)]
    pub interval: BillingInterval,

    /// Billing provider plan id. Omitted makes this a manual plan.
    #[serde(default)]
    pub provider_plan_id: Option<String>,
}

fn default_plans() -> Vec<PlanConfig> {
    vec![
        PlanConfig {
            id: "free".to_string(),
            name: "Free".to_string(),
            form_limit: Some(1),
            submission_limit: Some(50),
            price_cents: 0,
            interval: BillingInterval::Monthly,
            provider_plan_id: None,
        },
        PlanConfig {
            id: "starter".to_string(),
            name: "Starter".to_string(),
            form_limit: Some(5),
            submission_limit: Some(1_000),
            price_cents: 900,
            interval: BillingInterval::Monthly,
            provider_plan_id: None,
        },
        PlanConfig {
            id: "pro".to_string(),
            name: "Pro".to_string(),
            form_limit: Some(25),
            submission_limit: Some(10_000),
            price_cents: 2_900,
            interval: BillingInterval::Monthly,
            provider_plan_id: Some("plan_pro_monthly".to_string()),
        },
        PlanConfig {
            id: "business".to_string(),
            name: "Business".to_string(),
            form_limit: None,
            submission_limit: None,
            price_cents: 29_000,
            interval: BillingInterval::Yearly,
            provider_plan_id: Some("plan_business_yearly".to_string()),
        },
    ]
}
