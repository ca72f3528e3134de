//! Fixed-window rate limiting keyed by client IP and route path.
//!
//! A hit is recorded before the downstream handler runs. When a rule asks to
//! skip successful or failed requests the hit is reverted once the response
//! status is known (see [`RateLimiter::settle`]).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::schema::RateLimitRule;
use crate::observability::metrics;
use crate::security::clock::Clock;

/// Identity used when no header or socket address is available.
pub const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

/// Counter state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitEntry {
    /// Requests seen in the current window.
    pub count: u64,
    /// Epoch milliseconds at which the window closes.
    pub reset_time_ms: u64,
}

/// Storage for rate-limit windows.
///
/// `record_hit` must be atomic per key: the expiry check, the replacement of
/// a stale window and the increment happen under one lock.
pub trait RateLimitStore: Send + Sync + std::fmt::Debug {
    /// Count one request for `key` and return the updated entry.
    fn record_hit(&self, key: &str, now_ms: u64, window_ms: u64) -> RateLimitEntry;

    /// Undo one hit, provided the window that recorded it is still current.
    fn revert_hit(&self, key: &str, reset_time_ms: u64);

    /// Drop every entry whose window has closed. Returns how many were removed.
    fn sweep_expired(&self, now_ms: u64) -> usize;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current table, for the admin API.
    fn snapshot(&self) -> Vec<(String, RateLimitEntry)>;
}

/// Process-local store. Instances behind a load balancer do not share it.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for InMemoryStore {
    fn record_hit(&self, key: &str, now_ms: u64, window_ms: u64) -> RateLimitEntry {
        let mut entry = self.entries.entry(key.to_string()).or_insert(RateLimitEntry {
            count: 0,
            reset_time_ms: now_ms + window_ms,
        });
        if now_ms > entry.reset_time_ms {
            *entry = RateLimitEntry {
                count: 0,
                reset_time_ms: now_ms + window_ms,
            };
        }
        entry.count += 1;
        *entry
    }

    fn revert_hit(&self, key: &str, reset_time_ms: u64) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.reset_time_ms == reset_time_ms && entry.count > 0 {
                entry.count -= 1;
            }
        }
    }

    fn sweep_expired(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_time_ms > now_ms);
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn snapshot(&self) -> Vec<(String, RateLimitEntry)> {
        self.entries
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect()
    }
}

/// Limit, remaining budget and reset time of the window a request landed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub key: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_time_ms: u64,
}

impl RateLimitInfo {
    /// Give back the slot taken by a reverted hit.
    pub fn refund(&mut self) {
        self.remaining = (self.remaining + 1).min(self.limit);
    }

    /// Add `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`.
    ///
    /// The reset header carries Unix epoch seconds.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from(self.reset_time_ms.div_ceil(1000)),
        );
    }
}

/// Outcome of [`RateLimiter::check_and_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed(RateLimitInfo),
    Rejected {
        retry_after_secs: u64,
        info: RateLimitInfo,
    },
}

impl RateLimitDecision {
    pub fn info(&self) -> &RateLimitInfo {
        match self {
            RateLimitDecision::Allowed(info) => info,
            RateLimitDecision::Rejected { info, .. } => info,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed(_))
    }
}

/// Aborts the sweep task when dropped.
#[derive(Debug)]
struct SweeperHandle(JoinHandle<()>);

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fixed-window limiter over a [`RateLimitStore`].
#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    sweeper: Option<SweeperHandle>,
}

impl RateLimiter {
    /// Create a limiter without a background sweep.
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            sweeper: None,
        }
    }

    /// Start the periodic sweep of expired windows.
    ///
    /// The task stops on the shutdown signal or when the limiter is dropped.
    /// Must be called from within a Tokio runtime.
    pub fn with_sweeper(
        mut self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let store = self.store.clone();
        let clock = self.clock.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; nothing can have expired yet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired(clock.now_ms());
                        metrics::record_rate_limit_keys(store.len());
                        if removed > 0 {
                            tracing::debug!(
                                removed,
                                remaining = store.len(),
                                "Swept expired rate limit windows"
                            );
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        });

        self.sweeper = Some(SweeperHandle(handle));
        self
    }

    /// Record a request and decide whether it may proceed.
    pub fn check_and_record(
        &self,
        client_ip: &str,
        route_path: &str,
        rule: &RateLimitRule,
    ) -> RateLimitDecision {
        let key = format!("{}:{}", client_ip, route_path);
        let now = self.clock.now_ms();
        let entry = self.store.record_hit(&key, now, rule.window_ms);

        let info = RateLimitInfo {
            key,
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(entry.count),
            reset_time_ms: entry.reset_time_ms,
        };

        if entry.count > rule.max_requests {
            let retry_after_secs = entry.reset_time_ms.saturating_sub(now).div_ceil(1000);
            RateLimitDecision::Rejected { retry_after_secs, info }
        } else {
            RateLimitDecision::Allowed(info)
        }
    }

    /// Second phase for rules with skip flags: revert the hit if the response
    /// status falls into a skipped category. Returns whether it was reverted.
    pub fn settle(&self, info: &RateLimitInfo, rule: &RateLimitRule, status: StatusCode) -> bool {
        let failed = status.is_client_error() || status.is_server_error();
        let skip =
            (rule.skip_successful_requests && !failed) || (rule.skip_failed_requests && failed);
        if skip {
            self.store.revert_hit(&info.key, info.reset_time_ms);
        }
        skip
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    pub fn snapshot(&self) -> Vec<(String, RateLimitEntry)> {
        self.store.snapshot()
    }

    /// Run one sweep immediately.
    pub fn sweep_now(&self) -> usize {
        self.store.sweep_expired(self.clock.now_ms())
    }
}

/// Resolve the client identity used in rate-limit keys.
///
/// `X-Forwarded-For` (first hop) wins, then `X-Real-IP`, then `X-Client-IP`,
/// then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    header("x-real-ip")
        .or_else(|| header("x-client-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| FALLBACK_CLIENT_IP.to_string())
}
