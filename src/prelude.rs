//! Convenient re-exports for common keyfence types.
pub use crate::{
    clock::{Clock, ManualClock, MonotonicClock},
    config::{CoordinationConfig, GuardConfig, LockoutPolicy, RouteLimit},
    guard::{ConcurrencyGuard, RepositoryError, Versioned, VersionedRepository},
    identity::{KeyStrategy, RequestIdentity},
    lock::{AcquireBackoff, DistributedLock, LockToken},
    lockout::{LockoutStatus, LockoutTracker},
    rate_limit::{GateError, RateLimitDecision, RateLimitLayer},
    store::{InMemoryStore, KeyValueStore, WindowReservation},
    CoordinationError, RateLimiter,
};
