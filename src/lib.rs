#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # keyfence
//!
//! Distributed concurrency-control primitives for stateless, horizontally
//! scaled async services. A shared key-value store (anything Redis-shaped:
//! get/set/increment with per-key TTL plus single-key atomic steps) is the
//! only coordination medium — no in-process state matters across requests.
//!
//! ## Primitives
//!
//! - [`RateLimiter`]: atomic fixed-window counters keyed by client identity,
//!   failing open when the store is down
//! - [`DistributedLock`]: token-based mutual exclusion with non-blocking
//!   acquisition and ownership-checked release
//! - [`ConcurrencyGuard`]: lock plus optimistic versioned writes for
//!   conflict-safe entity updates
//! - [`LockoutTracker`]: failed-login counting with time-boxed account locks
//!
//! ## Quick Start
//!
//! ```rust
//! use keyfence::{InMemoryStore, RateLimiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryStore::new());
//!     let limiter = RateLimiter::new(store);
//!
//!     let decision = limiter
//!         .check_and_consume("ip:203.0.113.7", 5, Duration::from_secs(60))
//!         .await;
//!     assert!(decision.is_allowed());
//!     assert_eq!(decision.remaining, 4);
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod lock;
pub mod lockout;
pub mod prelude;
pub mod rate_limit;
pub mod store;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{CoordinationConfig, GuardConfig, LockoutPolicy, RouteLimit};
pub use error::CoordinationError;
pub use guard::{
    ConcurrencyGuard, InMemoryRepository, RepositoryError, Versioned, VersionedRepository,
};
pub use identity::{KeyStrategy, RequestIdentity};
pub use lock::{AcquireBackoff, DistributedLock, LockToken};
pub use lockout::{LockoutStatus, LockoutTracker};
pub use rate_limit::{GateError, RateLimitDecision, RateLimitLayer, RateLimiter};
pub use store::{InMemoryStore, KeyValueStore, WindowReservation};
