//! Error taxonomy for coordination outcomes.
//!
//! Low-level store errors are never exposed to callers directly; each
//! component translates them into one of the typed outcomes here. Every
//! variant carries a stable machine-readable code for boundary layers
//! (the rate-limit variant maps to HTTP 429 at the edge).

use std::time::Duration;

/// Unified error type for all coordination primitives.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// The fixed-window quota for the key is exhausted. Never retried
    /// automatically by the core.
    #[error("rate limit exceeded for '{key}': {limit} requests per {window:?}")]
    RateLimitExceeded {
        key: String,
        limit: u32,
        window: Duration,
        /// Time until the window resets.
        retry_after: Duration,
    },

    /// The resource is currently held by another process. The core does not
    /// retry; callers choose their own backoff or fail the request as busy.
    #[error("could not acquire lock '{key}': resource is busy")]
    LockAcquisitionFailed { key: String },

    /// The bounded optimistic retry loop could not converge.
    #[error("update of '{entity_id}' still conflicted after {attempts} attempts")]
    OptimisticConflictExhausted { entity_id: String, attempts: u32 },

    /// A live lockout record exists for the account; authentication is
    /// refused regardless of credential correctness.
    #[error("account '{username}' is locked")]
    AccountLocked {
        username: String,
        /// Time until the lockout expires naturally, when known.
        retry_after: Option<Duration>,
    },

    /// The guarded entity does not exist.
    #[error("entity '{entity_id}' not found")]
    EntityNotFound { entity_id: String },

    /// The coordination store could not be reached. The lock and the
    /// concurrency guard fail closed with this variant; the rate limiter
    /// fails open and never surfaces it.
    #[error("coordination store unavailable")]
    StoreUnavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl CoordinationError {
    pub(crate) fn store_unavailable<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StoreUnavailable { source: Box::new(source) }
    }

    /// Stable machine-readable code for boundary error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "RATE_LIMITED",
            Self::LockAcquisitionFailed { .. } => "RESOURCE_BUSY",
            Self::OptimisticConflictExhausted { .. } => "UPDATE_CONFLICT",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::EntityNotFound { .. } => "NOT_FOUND",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
        }
    }

    /// Check if this error is a rate-limit denial.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Check if this error signals a busy resource.
    pub fn is_lock_failed(&self) -> bool {
        matches!(self, Self::LockAcquisitionFailed { .. })
    }

    /// Check if this error is an exhausted optimistic retry loop.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::OptimisticConflictExhausted { .. })
    }

    /// Check if this error is an account lockout.
    pub fn is_account_locked(&self) -> bool {
        matches!(self, Self::AccountLocked { .. })
    }

    /// Check if this error is a store outage.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// How long the caller should wait before trying again, when the error
    /// carries that information.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            Self::AccountLocked { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_key_and_limit() {
        let err = CoordinationError::RateLimitExceeded {
            key: "ip:10.0.0.1".into(),
            limit: 100,
            window: Duration::from_secs(3600),
            retry_after: Duration::from_secs(120),
        };
        let msg = err.to_string();
        assert!(msg.contains("ip:10.0.0.1"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn codes_are_stable_per_variant() {
        let busy = CoordinationError::LockAcquisitionFailed { key: "entity-update:7".into() };
        assert_eq!(busy.code(), "RESOURCE_BUSY");
        assert!(busy.is_lock_failed());
        assert!(!busy.is_rate_limited());

        let conflict =
            CoordinationError::OptimisticConflictExhausted { entity_id: "7".into(), attempts: 3 };
        assert_eq!(conflict.code(), "UPDATE_CONFLICT");
        assert!(conflict.is_conflict());

        let locked =
            CoordinationError::AccountLocked { username: "alice".into(), retry_after: None };
        assert_eq!(locked.code(), "ACCOUNT_LOCKED");
        assert!(locked.is_account_locked());
    }

    #[test]
    fn retry_after_present_only_where_meaningful() {
        let limited = CoordinationError::RateLimitExceeded {
            key: "k".into(),
            limit: 5,
            window: Duration::from_secs(60),
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(42)));

        let busy = CoordinationError::LockAcquisitionFailed { key: "k".into() };
        assert_eq!(busy.retry_after(), None);
    }

    #[test]
    fn store_unavailable_preserves_source() {
        use std::error::Error;
        let err = CoordinationError::store_unavailable(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "redis down",
        ));
        assert!(err.is_store_unavailable());
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert!(err.source().unwrap().to_string().contains("redis down"));
    }
}
