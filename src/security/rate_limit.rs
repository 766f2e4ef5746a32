//! Per-client rate limiting for public form submissions.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::http::server::AppState;
use crate::observability::metrics;

/// Buckets idle this long are dropped when the table is pruned.
const IDLE_EVICTION: Duration = Duration::from_secs(300);
const PRUNE_THRESHOLD: usize = 10_000;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Inner {
    buckets: HashMap<IpAddr, TokenBucket>,
    rps: f64,
    burst: f64,
}

/// Token buckets keyed by client IP.
pub struct RateLimiter {
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buckets: HashMap::new(),
                rps: rps as f64,
                burst: burst.max(1) as f64,
            }),
        }
    }

    /// Apply new limits. Existing buckets keep their tokens.
    pub fn set_limits(&self, rps: u32, burst: u32) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.rps = rps as f64;
        inner.burst = burst.max(1) as f64;
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let (rps, burst) = (inner.rps, inner.burst);

        if inner.buckets.len() >= PRUNE_THRESHOLD {
            inner
                .buckets
                .retain(|_, b| now.duration_since(b.last_update) < IDLE_EVICTION);
        }

        inner
            .buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(burst, now))
            .try_acquire(burst, rps, now)
    }
}

/// Middleware guarding the public submission endpoint.
pub async fn submission_rate_limit(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if state.limiter.check(addr.ip()) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(client = %addr.ip(), "Submission rate limit exceeded");
        metrics::record_rate_limited("submissions");
        Err(AppError::RateLimited)
    }
}
