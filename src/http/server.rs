//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (tracing, request ID, timeouts, limits, headers)
//! - Apply hot-reloaded configuration
//! - Run background tasks (expiry sweep, snapshot flush)
//! - Serve until the shutdown broadcast fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::billing::BillingService;
use crate::config::validation::{validate_against_store, ValidationError};
use crate::config::AppConfig;
use crate::forms::FormService;
use crate::http::handlers::{accounts, forms, public, subscriptions, webhooks};
use crate::http::request;
use crate::observability::metrics;
use crate::security::{headers, require_user, submission_rate_limit, RateLimiter};
use crate::store::Store;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<AppConfig>>,
    pub store: Arc<Store>,
    pub billing: Arc<BillingService>,
    pub forms: Arc<FormService>,
    pub limiter: Arc<RateLimiter>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<Store>) -> Self {
        let limiter = RateLimiter::new(
            config.security.submission_rps,
            config.security.submission_burst,
        );
        let config = Arc::new(ArcSwap::from_pointee(config));
        let billing = Arc::new(BillingService::new(store.clone(), config.clone()));
        let forms = Arc::new(FormService::new(store.clone(), billing.clone()));

        Self {
            config,
            store,
            billing,
            forms,
            limiter: Arc::new(limiter),
            started_at: Utc::now(),
        }
    }

    /// Swap in a reloaded config and apply what can change at runtime.
    /// Swap in a reloaded config. A config that conflicts with the stored
    /// plan catalogue is rejected and the current one stays in effect.
    pub fn apply_config(&self, new_config: AppConfig) -> Result<(), Vec<ValidationError>> {
        if let Err(errors) = validate_against_store(&new_config, &self.store) {
            for error in &errors {
                tracing::error!(error = %error, "Rejected config reload");
            }
            return Err(errors);
        }
        if self.config.load().listener.bind_address != new_config.listener.bind_address {
            tracing::warn!("listener.bind_address changes take effect after restart");
        }

        let seeded = self
            .store
            .seed_plans(&new_config.plans, &new_config.billing.currency);
        if !seeded.is_empty() {
            tracing::info!(plans = ?seeded, "Seeded new plans from config");
        }
        self.limiter.set_limits(
            new_config.security.submission_rps,
            new_config.security.submission_burst,
        );
        self.config.store(Arc::new(new_config));
        tracing::info!("Configuration reloaded");
        Ok(())
    }
}

/// HTTP server for the formdesk API.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server over `store`. Plans from `config` are seeded.
    pub fn new(config: AppConfig, store: Arc<Store>) -> Self {
        store.seed_plans(&config.plans, &config.billing.currency);
        let state = AppState::new(config.clone(), store);
        let router = Self::build_router(&config, state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: AppState) -> Router {
        let customer = Router::new()
            .route("/api/me", get(accounts::me))
            .route("/api/usage", get(forms::usage))
            .route("/api/forms", get(forms::list).post(forms::create))
            .route(
                "/api/forms/{id}",
                get(forms::get).put(forms::update).delete(forms::delete),
            )
            .route("/api/forms/{id}/publish", post(forms::publish))
            .route("/api/forms/{id}/submissions", get(forms::submissions))
            .route("/api/subscription", get(subscriptions::current))
            .route("/api/subscription/preview", get(subscriptions::preview))
            .route("/api/subscription/change", post(subscriptions::change))
            .route(
                "/api/subscription/pending",
                axum::routing::delete(subscriptions::cancel_pending),
            )
            .route("/api/payments", get(subscriptions::payments))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

        let submissions = Router::new()
            .route("/public/forms/{id}/submissions", post(public::submit))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                submission_rate_limit,
            ));

        let router = Router::new()
            .route("/health", get(health))
            .route("/api/plans", get(accounts::plans))
            .route("/api/users", post(accounts::sign_up))
            .route("/public/forms/{id}", get(public::get_form))
            .route("/webhooks/billing", post(webhooks::billing))
            .merge(customer)
            .merge(submissions)
            .merge(setup_admin_router(&state))
            .layer(middleware::from_fn(track_metrics))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(request::make_span));

        let router = if config.security.enable_headers {
            headers::apply(router)
        } else {
            router
        };
        request::with_request_id(router)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<AppConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        spawn_config_reloader(self.state.clone(), config_updates, shutdown.resubscribe());

        let config = self.state.config.load_full();
        spawn_expiry_sweep(
            self.state.billing.clone(),
            Duration::from_secs(config.billing.expiry_sweep_secs.max(1)),
            shutdown.resubscribe(),
        );
        if self.state.store.is_persistent() {
            spawn_snapshot_flush(
                self.state.store.clone(),
                Duration::from_secs(config.store.flush_interval_secs.max(1)),
                shutdown.resubscribe(),
            );
        }

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        // Serve with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Record request count and latency, labelled by the matched route template.
async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_request(&method, &route, response.status().as_u16(), start);
    response
}

fn spawn_config_reloader(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<AppConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(new_config) => {
                        let _ = state.apply_config(new_config);
                    }
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    });
}

fn spawn_expiry_sweep(
    billing: Arc<BillingService>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if let Err(e) = billing.sweep_expired(now) {
                        tracing::error!(error = %e, "Expiry sweep failed");
                    }
                    billing.prune_webhook_events(now);
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}

fn spawn_snapshot_flush(store: Arc<Store>, every: Duration, mut shutdown: broadcast::Receiver<()>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let store = store.clone();
                    match tokio::task::spawn_blocking(move || store.save_to_file()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::error!(error = %e, "Snapshot flush failed"),
                        Err(e) => tracing::error!(error = %e, "Snapshot flush task panicked"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}
