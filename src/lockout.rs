//! Brute-force lockout tracking.
//!
//! A small per-username state machine, `Normal -> Locked -> Normal`, built on
//! two TTL-bound records: an attempt counter (`login-attempt:<username>`)
//! and a lockout marker (`account-lockout:<username>`). A live marker means
//! locked; absence means unlocked. The `Locked -> Normal` transition happens
//! implicitly when the marker's TTL elapses — no timer runs, the next check
//! simply observes its absence.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::LockoutPolicy;
use crate::error::CoordinationError;
use crate::store::KeyValueStore;

/// Prefix for failed-attempt counter keys.
pub const ATTEMPT_KEY_PREFIX: &str = "login-attempt";
/// Prefix for lockout marker keys.
pub const LOCKOUT_KEY_PREFIX: &str = "account-lockout";

const LOCKED_MARKER: &str = "locked";

/// Result of recording one failed authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutStatus {
    /// Failures currently counted against the account.
    pub attempts: u64,
    /// Whether this failure tripped the lockout.
    pub locked: bool,
}

/// Converts repeated authentication failures into a time-boxed account lock.
///
/// Store outages propagate as [`CoordinationError::StoreUnavailable`]: an
/// unavailable tracker must not silently wave authentication attempts
/// through.
#[derive(Debug, Clone)]
pub struct LockoutTracker<S> {
    store: Arc<S>,
    policy: LockoutPolicy,
}

impl<S> LockoutTracker<S>
where
    S: KeyValueStore,
{
    pub fn new(store: Arc<S>, policy: LockoutPolicy) -> Self {
        Self { store, policy }
    }

    fn attempt_key(username: &str) -> String {
        format!("{ATTEMPT_KEY_PREFIX}:{username}")
    }

    fn lockout_key(username: &str) -> String {
        format!("{LOCKOUT_KEY_PREFIX}:{username}")
    }

    /// Count a failed attempt; locks the account when the configured maximum
    /// is reached.
    pub async fn record_failure(&self, username: &str) -> Result<LockoutStatus, CoordinationError> {
        let attempts = self
            .store
            .incr_with_ttl(&Self::attempt_key(username), self.policy.attempt_window())
            .await
            .map_err(CoordinationError::store_unavailable)?;

        debug!(username, attempts, "failed login attempt recorded");

        if attempts >= u64::from(self.policy.max_login_attempts) {
            self.store
                .set(&Self::lockout_key(username), LOCKED_MARKER, self.policy.lockout_duration())
                .await
                .map_err(CoordinationError::store_unavailable)?;
            warn!(username, attempts, "account locked after repeated failures");
            return Ok(LockoutStatus { attempts, locked: true });
        }

        Ok(LockoutStatus { attempts, locked: false })
    }

    /// Whether a non-expired lockout record exists for the account.
    pub async fn is_locked(&self, username: &str) -> Result<bool, CoordinationError> {
        self.store
            .exists(&Self::lockout_key(username))
            .await
            .map_err(CoordinationError::store_unavailable)
    }

    /// Refuse with [`CoordinationError::AccountLocked`] while the lockout is
    /// live. Meant as the first step of an authentication flow.
    pub async fn ensure_unlocked(&self, username: &str) -> Result<(), CoordinationError> {
        let retry_after = self
            .store
            .ttl(&Self::lockout_key(username))
            .await
            .map_err(CoordinationError::store_unavailable)?;
        match retry_after {
            Some(retry_after) => Err(CoordinationError::AccountLocked {
                username: username.to_string(),
                retry_after: Some(retry_after),
            }),
            None => Ok(()),
        }
    }

    /// Clear the failure counter. Called on successful authentication.
    pub async fn reset_attempts(&self, username: &str) -> Result<(), CoordinationError> {
        self.store
            .delete(&Self::attempt_key(username))
            .await
            .map_err(CoordinationError::store_unavailable)?;
        debug!(username, "login attempts reset");
        Ok(())
    }

    /// Administrative unlock: clears both records, returning the account to
    /// `Normal` immediately instead of waiting out the TTL.
    pub async fn unlock(&self, username: &str) -> Result<(), CoordinationError> {
        self.store
            .delete(&Self::attempt_key(username))
            .await
            .map_err(CoordinationError::store_unavailable)?;
        self.store
            .delete(&Self::lockout_key(username))
            .await
            .map_err(CoordinationError::store_unavailable)?;
        debug!(username, "account unlocked");
        Ok(())
    }

    /// Failures left before the account locks.
    pub async fn remaining_attempts(&self, username: &str) -> Result<u32, CoordinationError> {
        let counted = match self
            .store
            .get(&Self::attempt_key(username))
            .await
            .map_err(CoordinationError::store_unavailable)?
        {
            Some(value) => value.parse::<u64>().unwrap_or(0),
            None => 0,
        };
        Ok(u32::try_from(u64::from(self.policy.max_login_attempts).saturating_sub(counted))
            .unwrap_or(0))
    }

    /// Time until the lockout expires naturally, `None` when not locked.
    pub async fn lockout_remaining(
        &self,
        username: &str,
    ) -> Result<Option<Duration>, CoordinationError> {
        self.store
            .ttl(&Self::lockout_key(username))
            .await
            .map_err(CoordinationError::store_unavailable)
    }
}
