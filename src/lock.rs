//! Token-based distributed mutual exclusion.
//!
//! The lock lives entirely in the shared store: acquisition is one atomic
//! set-if-absent of a fresh random token with a TTL, release is one atomic
//! compare-and-delete against that token. At most one valid token exists per
//! key at any instant; the TTL is the safety net that reclaims locks from
//! crashed holders.
//!
//! Acquisition is a single non-blocking attempt. Contention is reported
//! immediately, never queued — callers pick their own retry/backoff policy.
//! A store outage **fails closed**: proceeding without the lock would break
//! the mutual-exclusion contract.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoordinationError;
use crate::store::KeyValueStore;

/// Caller-side retry policy for contended acquisitions.
///
/// The lock itself never waits; this is the opt-in backoff a caller layers on
/// top. Exponential with a random jitter of up to half the step, to keep
/// contending instances from retrying in lockstep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireBackoff {
    /// Total acquisition attempts, initial try included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
}

impl Default for AcquireBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl AcquireBackoff {
    /// Jittered delay before retry number `retry` (1-indexed).
    fn delay(&self, retry: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .min(self.max_delay);
        // Rng is created and dropped here so nothing non-Send crosses an await.
        let jitter_millis = rand::rng().random_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_millis)
    }
}

/// Opaque proof of lock ownership, unique per acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Store-backed mutual-exclusion primitive.
#[derive(Debug, Clone)]
pub struct DistributedLock<S> {
    store: Arc<S>,
}

impl<S> DistributedLock<S>
where
    S: KeyValueStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Try once to take the lock. `None` means another holder has it.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CoordinationError> {
        let token = LockToken::generate();
        let acquired = self
            .store
            .set_if_absent(key, token.as_str(), ttl)
            .await
            .map_err(CoordinationError::store_unavailable)?;

        if acquired {
            debug!(key, token = token.as_str(), "lock acquired");
            Ok(Some(token))
        } else {
            debug!(key, "lock busy");
            Ok(None)
        }
    }

    /// Take the lock, retrying with jittered exponential backoff.
    ///
    /// `None` means every attempt found the lock held. Store outages still
    /// fail closed immediately — only contention is retried.
    pub async fn acquire_with_backoff(
        &self,
        key: &str,
        ttl: Duration,
        backoff: &AcquireBackoff,
    ) -> Result<Option<LockToken>, CoordinationError> {
        let attempts = backoff.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(token) = self.acquire(key, ttl).await? {
                return Ok(Some(token));
            }
            if attempt < attempts {
                let delay = backoff.delay(attempt);
                debug!(key, attempt, delay_ms = delay.as_millis() as u64, "lock held, backing off");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }

    /// Release the lock if `token` still owns it.
    ///
    /// Returns `false` when the stored token differs — the lock expired and
    /// was re-acquired by someone else, and must not be touched.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<bool, CoordinationError> {
        let released = self
            .store
            .delete_if_equals(key, token.as_str())
            .await
            .map_err(CoordinationError::store_unavailable)?;

        if released {
            debug!(key, "lock released");
        } else {
            debug!(key, "release skipped, token no longer owns the lock");
        }
        Ok(released)
    }

    /// Whether a live lock exists for the key.
    pub async fn is_locked(&self, key: &str) -> Result<bool, CoordinationError> {
        self.store.exists(key).await.map_err(CoordinationError::store_unavailable)
    }

    /// Current holder token, for diagnostics.
    pub async fn holder_token(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        self.store.get(key).await.map_err(CoordinationError::store_unavailable)
    }

    /// Run `task` under the lock, releasing on every exit path.
    ///
    /// Surfaces [`CoordinationError::LockAcquisitionFailed`] without running
    /// the task when the lock is held elsewhere. A failed release is logged
    /// and swallowed — the TTL reclaims the key.
    pub async fn run_exclusive<T, Fut, Op>(
        &self,
        key: &str,
        ttl: Duration,
        task: Op,
    ) -> Result<T, CoordinationError>
    where
        Op: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        let Some(token) = self.acquire(key, ttl).await? else {
            return Err(CoordinationError::LockAcquisitionFailed { key: key.to_string() });
        };

        let value = task().await;

        match self.release(key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(key, "lock expired before release, another holder may have run"),
            Err(err) => warn!(key, error = %err, "lock release failed, ttl will reclaim it"),
        }
        Ok(value)
    }
}
