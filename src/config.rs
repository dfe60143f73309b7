//! Configuration surface consumed by the coordination primitives.
//!
//! Plain serde-derivable structs so a host application can deserialize them
//! from whatever config source it already uses. Durations are expressed in
//! the units the knobs are usually written in (seconds for windows and lock
//! TTLs, minutes for lockout policy) with `Duration` accessors alongside.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::KeyStrategy;

/// Per-route (or per-operation) rate-limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// How the counter key is derived from the request.
    #[serde(default)]
    pub strategy: KeyStrategy,
}

impl RouteLimit {
    pub fn new(limit: u32, window_secs: u64, strategy: KeyStrategy) -> Self {
        Self { limit, window_secs, strategy }
    }

    /// Baseline per-client-address limit: 100 requests per hour.
    pub fn per_ip() -> Self {
        Self::new(100, 3600, KeyStrategy::ByIp)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RouteLimit {
    /// Per-endpoint default: 10 requests per minute.
    fn default() -> Self {
        Self::new(10, 60, KeyStrategy::ByEndpoint)
    }
}

/// Brute-force lockout policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutPolicy {
    /// Failed attempts before the account is locked.
    pub max_login_attempts: u32,
    /// Minutes a failure stays counted. Each new failure refreshes the
    /// window.
    pub attempt_window_minutes: u64,
    /// Minutes the lockout record lives once written.
    pub lockout_duration_minutes: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self { max_login_attempts: 5, attempt_window_minutes: 30, lockout_duration_minutes: 30 }
    }
}

impl LockoutPolicy {
    pub fn attempt_window(&self) -> Duration {
        Duration::from_secs(self.attempt_window_minutes * 60)
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_minutes * 60)
    }
}

/// Tuning for the entity-update concurrency guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Seconds the update lock lives if the holder crashes.
    pub lock_ttl_secs: u64,
    /// Optimistic read-mutate-write attempts before giving up.
    pub max_retries: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self { lock_ttl_secs: 30, max_retries: 3 }
    }
}

impl GuardConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// Aggregate configuration for the whole coordination core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub rate_limit: RouteLimit,
    pub lockout: LockoutPolicy,
    pub guard: GuardConfig,
}
