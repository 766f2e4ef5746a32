//! Metrics collection and exposition.
//!
//! # Metrics
//! - `formdesk_http_requests_total` (counter): requests by method, route, status
//! - `formdesk_http_request_duration_seconds` (histogram): latency distribution
//! - `formdesk_plan_changes_total` (counter): applied plan changes by kind
//! - `formdesk_forms_locked_total` / `formdesk_forms_unlocked_total` (counters)
//! - `formdesk_webhooks_total` (counter): provider webhooks by outcome
//! - `formdesk_submissions_total` (counter): accepted public submissions
//! - `formdesk_rate_limited_total` (counter): rejected by the rate limiter
//!
//! Recording is a no-op until `init_metrics` installs the Prometheus recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    counter!("formdesk_http_requests_total", &labels).increment(1);
    histogram!("formdesk_http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_plan_change(kind: &'static str) {
    counter!("formdesk_plan_changes_total", "kind" => kind).increment(1);
}

pub fn record_forms_locked(count: usize) {
    if count > 0 {
        counter!("formdesk_forms_locked_total").increment(count as u64);
    }
}

pub fn record_forms_unlocked(count: usize) {
    if count > 0 {
        counter!("formdesk_forms_unlocked_total").increment(count as u64);
    }
}

pub fn record_webhook(outcome: &'static str) {
    counter!("formdesk_webhooks_total", "outcome" => outcome).increment(1);
}

pub fn record_submission() {
    counter!("formdesk_submissions_total").increment(1);
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("formdesk_rate_limited_total", "scope" => scope).increment(1);
}
