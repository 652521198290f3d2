//! Fixed-window rate limiting.
//!
//! Two independently configured limiters guard the API: a lenient one for all
//! `/api` traffic and a strict one for the credential-issuing auth endpoints.
//! Counters live behind the `CounterStore` trait so the in-process map can be
//! replaced by a shared store without touching the middleware.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

use crate::{config::AppConfig, error::ApiError};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

// =============================================================================
// Counter store
// =============================================================================

#[derive(Debug, Error)]
#[error("counter store unavailable: {0}")]
pub struct CounterStoreError(pub String);

/// CounterStore
///
/// Atomic per-(key, window) counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments the counter for `key` in `window_id` and returns the new count.
    async fn increment(&self, key: &str, window_id: u64) -> Result<u32, CounterStoreError>;
}

/// InMemoryCounterStore
///
/// Process-local `CounterStore`. Counters of windows older than the newest one
/// seen are dropped the first time a newer window is observed.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<(String, u64), u32>,
    newest_window: AtomicU64,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (key, window) counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window_id: u64) -> Result<u32, CounterStoreError> {
        let previous = self.newest_window.fetch_max(window_id, Ordering::AcqRel);
        if window_id > previous {
            self.counters.retain(|(_, window), _| *window >= window_id);
        }

        let mut count = self
            .counters
            .entry((key.to_string(), window_id))
            .or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }
}

// =============================================================================
// Limiter
// =============================================================================

/// RateLimitConfig
///
/// One limiter's quota and the body it answers with once the quota is spent.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub message: String,
    /// Human-readable wait hint sent as `retryAfter`.
    pub retry_after: String,
}

impl RateLimitConfig {
    /// Strict limiter for register and login.
    pub fn auth(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            message: "Too many login attempts from this IP. Please try again after 15 minutes."
                .to_string(),
            retry_after: describe_window(window),
        }
    }

    /// Lenient limiter for all `/api` traffic.
    pub fn api(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            message: "Too many requests from this IP. Please try again later.".to_string(),
            retry_after: describe_window(window),
        }
    }
}

fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{} seconds", secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_secs: u64,
    },
    Limited {
        limit: u32,
        retry_after_secs: u64,
    },
}

/// RateLimiter
///
/// Fixed-window limiter. The window id is `floor(now / window)`, so a request at
/// exactly the window boundary is counted in the new window.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    trusted_proxy_hops: usize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>, trusted_proxy_hops: usize) -> Self {
        Self {
            config,
            store,
            trusted_proxy_hops,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// check
    ///
    /// Counts one request for `key` at `now_ms` (milliseconds since the epoch).
    /// A store failure lets the request through.
    pub async fn check(&self, key: &str, now_ms: u64) -> RateLimitDecision {
        let window_ms = u64::try_from(self.config.window.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let window_id = now_ms / window_ms;
        let window_end_ms = window_id.saturating_add(1).saturating_mul(window_ms);
        let reset_secs = (window_end_ms - now_ms).div_ceil(1000);
        let limit = self.config.max_requests;

        match self.store.increment(key, window_id).await {
            Ok(count) if count > limit => RateLimitDecision::Limited {
                limit,
                retry_after_secs: reset_secs,
            },
            Ok(count) => RateLimitDecision::Allowed {
                limit,
                remaining: limit - count,
                reset_secs,
            },
            Err(e) => {
                tracing::warn!(key, error = %e, "Rate limiter store failed, allowing request");
                RateLimitDecision::Allowed {
                    limit,
                    remaining: limit,
                    reset_secs,
                }
            }
        }
    }
}

/// RateLimiters
///
/// The two limiter instances held in `AppState`, each with its own counters.
#[derive(Clone)]
pub struct RateLimiters {
    pub api: Arc<RateLimiter>,
    pub auth: Arc<RateLimiter>,
}

impl RateLimiters {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            api: Arc::new(RateLimiter::new(
                RateLimitConfig::api(config.rate_limit_window, config.api_rate_limit_max),
                Arc::new(InMemoryCounterStore::new()),
                config.trust_proxy_hops,
            )),
            auth: Arc::new(RateLimiter::new(
                RateLimitConfig::auth(config.rate_limit_window, config.auth_rate_limit_max),
                Arc::new(InMemoryCounterStore::new()),
                config.trust_proxy_hops,
            )),
        }
    }
}

// =============================================================================
// Client key
// =============================================================================

/// client_key
///
/// Resolves the address requests are counted against. The chain is the direct
/// peer followed by the `X-Forwarded-For` entries from right to left; the first
/// `hops` addresses belong to trusted proxies and are skipped. With `hops = 0` the
/// peer itself is the key, so every client behind a proxy shares one quota.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, hops: usize) -> String {
    let mut chain = vec![
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    ];

    if hops > 0 {
        let forwarded = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        chain.extend(forwarded.into_iter().rev());
    }

    let index = hops.min(chain.len() - 1);
    chain.swap_remove(index)
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

// =============================================================================
// Middleware
// =============================================================================

/// limit_api_traffic
///
/// Router-wide layer. Only paths under `/api` are counted.
pub async fn limit_api_traffic(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path != "/api" && !path.starts_with("/api/") {
        return next.run(request).await;
    }
    enforce(&limiter, request, next).await
}

/// limit_credential_requests
///
/// Route layer for register and login.
pub async fn limit_credential_requests(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&limiter, request, next).await
}

async fn enforce(limiter: &RateLimiter, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer, limiter.trusted_proxy_hops);

    match limiter.check(&key, now_ms()).await {
        RateLimitDecision::Allowed {
            limit,
            remaining,
            reset_secs,
        } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            // A nested limiter that already answered keeps its own numbers.
            if !headers.contains_key(&RATELIMIT_LIMIT) {
                headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
                headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
                headers.insert(RATELIMIT_RESET.clone(), HeaderValue::from(reset_secs));
            }
            response
        }
        RateLimitDecision::Limited {
            limit,
            retry_after_secs,
        } => {
            tracing::warn!(
                client = %key,
                path = %request.uri().path(),
                "Rate limit exceeded"
            );
            let mut response = ApiError::RateLimited {
                message: limiter.config.message.clone(),
                retry_after: limiter.config.retry_after.clone(),
                retry_after_secs,
            }
            .into_response();
            let headers = response.headers_mut();
            headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
            headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(0u32));
            headers.insert(RATELIMIT_RESET.clone(), HeaderValue::from(retry_after_secs));
            response
        }
    }
}
