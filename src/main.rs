//! formdesk API server
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ http (request id, trace, timeout, limits, headers)
//!                │
//!                ├─▶ public      forms, submissions (rate limited), webhooks
//!                ├─▶ customer    X-User-Id → forms, usage, subscription
//!                └─▶ admin       Bearer key → plans, payments, users, audit
//!                        │
//!                        ▼
//!        forms::FormService ──▶ billing::BillingService (reconcile)
//!                        │
//!                        ▼
//!                 store (DashMap + JSON snapshot)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use formdesk::config::{load_config, watcher::ConfigWatcher, AppConfig};
use formdesk::observability::{logging, metrics};
use formdesk::{HttpServer, Shutdown, Store};

#[derive(Parser)]
#[command(name = "formdesk", version, about = "Feedback form and subscription API server")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "FORMDESK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "formdesk starting");

    if config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
        tracing::warn!("admin.api_key is the placeholder default; set a real key");
    }
    if config.billing.webhook_secret.is_empty() {
        tracing::warn!("billing.webhook_secret is empty; provider webhooks will be rejected");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        plans = config.plans.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validated at load time.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        }
    }

    let store = Arc::new(match &config.store.snapshot_path {
        Some(path) => Store::load_from_file(Path::new(path))?,
        None => {
            tracing::warn!("store.snapshot_path not set; data is kept in memory only");
            Store::new(None)
        }
    });

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher failed to start; hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    let server = HttpServer::new(config, store.clone());
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    if let Err(e) = store.save_to_file() {
        tracing::error!(error = %e, "Final snapshot flush failed");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_from_flag_or_env() {
        let args = Args::try_parse_from(["formdesk", "--config", "formdesk.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("formdesk.toml")));

        let args = Args::try_parse_from(["formdesk", "-c", "other.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("other.toml")));

        std::env::set_var("FORMDESK_CONFIG", "/etc/formdesk.toml");
        let from_env = Args::try_parse_from(["formdesk"]).unwrap();
        let flag_wins = Args::try_parse_from(["formdesk", "--config", "local.toml"]).unwrap();
        std::env::remove_var("FORMDESK_CONFIG");
        assert_eq!(from_env.config, Some(PathBuf::from("/etc/formdesk.toml")));
        assert_eq!(flag_wins.config, Some(PathBuf::from("local.toml")));

        assert_eq!(Args::try_parse_from(["formdesk"]).unwrap().config, None);
    }
}
