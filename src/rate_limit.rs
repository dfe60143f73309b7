//! Fixed-window rate limiting over the shared store.
//!
//! The limiter owns no state of its own: every check is one atomic
//! fixed-window step against the store ([`KeyValueStore::fixed_window_incr`]),
//! so any number of service instances share the same windows.
//!
//! Failure policy: the limiter protects against abuse, not correctness, so a
//! store outage **fails open** — the request is allowed, a warning is logged,
//! and the decision is marked degraded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::CoordinationError;
use crate::identity::{KeyStrategy, RequestIdentity};
use crate::store::KeyValueStore;

pub mod middleware;
pub use middleware::{GateError, RateLimitLayer, RateLimitService};

/// `X-RateLimit-Limit` response header.
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// `X-RateLimit-Remaining` response header.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// `X-RateLimit-Reset` response header (seconds until the window resets).
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

/// The outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Configured window limit.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Time until the window resets.
    pub reset: Duration,
    /// Set when the store was unreachable and the limiter failed open; the
    /// quota fields are then nominal, not observed.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Metadata for the standard rate-limit response headers.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (LIMIT_HEADER, self.limit.to_string()),
            (REMAINING_HEADER, self.remaining.to_string()),
            (RESET_HEADER, self.reset.as_secs().to_string()),
        ]
    }
}

/// Atomic fixed-window counter keyed by client identity.
#[derive(Debug, Clone)]
pub struct RateLimiter<S> {
    store: Arc<S>,
}

impl<S> RateLimiter<S>
where
    S: KeyValueStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Count this request against `key` and decide.
    ///
    /// Atomic against the key: an absent counter is created at 1 with
    /// TTL = `window`; a counter below `limit` is incremented; a counter at
    /// the limit denies without incrementing. Store failures allow the
    /// request (fail open).
    pub async fn check_and_consume(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        match self.store.fixed_window_incr(key, limit, window).await {
            Ok(reservation) => {
                let remaining =
                    u32::try_from(u64::from(limit).saturating_sub(reservation.count))
                        .unwrap_or(0);
                debug!(
                    key,
                    limit,
                    count = reservation.count,
                    remaining,
                    allowed = reservation.admitted,
                    "rate limit check"
                );
                RateLimitDecision {
                    allowed: reservation.admitted,
                    limit,
                    remaining,
                    reset: reservation.ttl,
                    degraded: false,
                }
            }
            Err(err) => {
                warn!(key, error = %err, "rate limit store unavailable, failing open");
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset: Duration::ZERO,
                    degraded: true,
                }
            }
        }
    }

    /// Check a request, deriving the counter key from its identity.
    pub async fn check_request(
        &self,
        strategy: &KeyStrategy,
        identity: &RequestIdentity,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let key = strategy.key_for(identity);
        self.check_and_consume(&key, limit, window).await
    }

    /// Like [`check_and_consume`](Self::check_and_consume), but a denial is
    /// returned as [`CoordinationError::RateLimitExceeded`].
    pub async fn enforce(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, CoordinationError> {
        let decision = self.check_and_consume(key, limit, window).await;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(CoordinationError::RateLimitExceeded {
                key: key.to_string(),
                limit,
                window,
                retry_after: decision.reset,
            })
        }
    }

    /// Peek at the quota left for `key` without consuming a request.
    ///
    /// Fails open like the check itself: a store outage reports the full
    /// limit.
    pub async fn remaining(&self, key: &str, limit: u32) -> u32 {
        match self.store.get(key).await {
            Ok(Some(value)) => match value.parse::<u64>() {
                Ok(count) => {
                    u32::try_from(u64::from(limit).saturating_sub(count)).unwrap_or(0)
                }
                Err(_) => {
                    warn!(key, value, "non-numeric rate limit counter");
                    limit
                }
            },
            Ok(None) => limit,
            Err(err) => {
                warn!(key, error = %err, "rate limit store unavailable");
                limit
            }
        }
    }

    /// Clear the counter for `key`, restoring the full quota immediately.
    pub async fn reset_limit(&self, key: &str) -> Result<(), CoordinationError> {
        self.store.delete(key).await.map_err(CoordinationError::store_unavailable)?;
        debug!(key, "rate limit reset");
        Ok(())
    }
}
