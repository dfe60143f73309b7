//! Shared key-value store seam.
//!
//! All cross-process coordination state lives behind [`KeyValueStore`]: plain
//! get/set/delete with per-key TTL, plus three atomic compare-and-act steps
//! (fixed-window increment, set-if-absent, compare-and-delete). Each atomic
//! step must execute as a single server-side operation against one key — on a
//! Redis backend these map to Lua scripts or `SET NX`; the in-memory backend
//! holds its mutex for the duration of the step.
//!
//! Within a single key the atomic steps are totally ordered; across keys no
//! ordering is guaranteed or needed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{Clock, MonotonicClock};

/// Outcome of one atomic fixed-window counter step.
///
/// `admitted` is reported explicitly by the step itself: on the deny path the
/// stored count equals (or exceeds) the limit, so a caller comparing
/// `count <= limit` after the fact would admit one extra request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReservation {
    /// Whether this request was counted into the window.
    pub admitted: bool,
    /// Count stored for the key after the step.
    pub count: u64,
    /// Remaining time until the window resets.
    pub ttl: Duration,
}

/// Abstract storage interface for coordination state.
///
/// Designed to support both in-memory and distributed backends; components
/// never cache values between calls, the store is the single source of truth.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the current value for a key, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Set a value with a TTL, overwriting any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error>;

    /// Atomically set a value with a TTL only if the key is absent.
    ///
    /// Returns `true` if the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, Self::Error>;

    /// Delete a key. Returns `true` if a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, Self::Error>;

    /// Atomically delete a key only if its current value equals `expected`.
    ///
    /// Returns `true` if the key was removed.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, Self::Error>;

    /// Whether a live (non-expired) value exists for the key.
    async fn exists(&self, key: &str) -> Result<bool, Self::Error>;

    /// Remaining TTL for a key, `None` if absent or expired.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error>;

    /// One atomic fixed-window counter step.
    ///
    /// Absent key: store 1 with TTL = `window` and admit. Count below
    /// `limit`: increment and admit. Count at or above `limit`: deny without
    /// incrementing. The read-check-write sequence is a single atomic step so
    /// two concurrent callers cannot both observe "below limit" and both be
    /// admitted.
    async fn fixed_window_incr(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowReservation, Self::Error>;

    /// Atomically increment an unbounded counter, refreshing its TTL.
    ///
    /// Creates the key at 1 if absent. Returns the count after the increment.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, Self::Error>;
}

/// Errors from the in-memory backend.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryStoreError {
    /// A counter operation hit a key holding a non-numeric value.
    #[error("value at '{key}' is not an integer")]
    NotAnInteger { key: String },
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_millis: u64,
}

/// Single-process [`KeyValueStore`] with lazy TTL expiry.
///
/// Every trait method takes the map mutex once for its whole step, which
/// gives the same per-key atomicity a scripted distributed backend provides.
/// Suitable for tests and single-instance deployments.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store driven by an injected clock (tests use [`crate::clock::ManualClock`]).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    fn expiry(&self, ttl: Duration) -> u64 {
        self.clock
            .now_millis()
            .saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }

    /// Drop the entry if its TTL has elapsed, then return the live one.
    fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str, now: u64) -> Option<&'a Entry> {
        if let Some(entry) = map.get(key) {
            if entry.expires_at_millis <= now {
                map.remove(key);
                return None;
            }
        }
        map.get(key)
    }

    fn parse_count(key: &str, entry: &Entry) -> Result<u64, InMemoryStoreError> {
        entry
            .value
            .parse::<u64>()
            .map_err(|_| InMemoryStoreError::NotAnInteger { key: key.to_string() })
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    type Error = InMemoryStoreError;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let now = self.clock.now_millis();
        let mut map = self.data.lock().unwrap();
        Ok(Self::live(&mut map, key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error> {
        let expires_at_millis = self.expiry(ttl);
        let mut map = self.data.lock().unwrap();
        map.insert(key.to_string(), Entry { value: value.to_string(), expires_at_millis });
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        let now = self.clock.now_millis();
        let expires_at_millis = self.expiry(ttl);
        let mut map = self.data.lock().unwrap();
        if Self::live(&mut map, key, now).is_some() {
            return Ok(false);
        }
        map.insert(key.to_string(), Entry { value: value.to_string(), expires_at_millis });
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, Self::Error> {
        let now = self.clock.now_millis();
        let mut map = self.data.lock().unwrap();
        let was_live = Self::live(&mut map, key, now).is_some();
        map.remove(key);
        Ok(was_live)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, Self::Error> {
        let now = self.clock.now_millis();
        let mut map = self.data.lock().unwrap();
        let owns = matches!(Self::live(&mut map, key, now), Some(entry) if entry.value == expected);
        if owns {
            map.remove(key);
        }
        Ok(owns)
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        let now = self.clock.now_millis();
        let mut map = self.data.lock().unwrap();
        Ok(Self::live(&mut map, key, now).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        let now = self.clock.now_millis();
        let mut map = self.data.lock().unwrap();
        Ok(Self::live(&mut map, key, now)
            .map(|e| Duration::from_millis(e.expires_at_millis - now)))
    }

    async fn fixed_window_incr(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowReservation, Self::Error> {
        let now = self.clock.now_millis();
        let mut map = self.data.lock().unwrap();

        let Some(entry) = Self::live(&mut map, key, now) else {
            let expires_at_millis = self.expiry(window);
            map.insert(key.to_string(), Entry { value: "1".to_string(), expires_at_millis });
            return Ok(WindowReservation { admitted: true, count: 1, ttl: window });
        };

        let count = Self::parse_count(key, entry)?;
        let ttl = Duration::from_millis(entry.expires_at_millis - now);
        if count < u64::from(limit) {
            let expires_at_millis = entry.expires_at_millis;
            map.insert(
                key.to_string(),
                Entry { value: (count + 1).to_string(), expires_at_millis },
            );
            Ok(WindowReservation { admitted: true, count: count + 1, ttl })
        } else {
            Ok(WindowReservation { admitted: false, count, ttl })
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, Self::Error> {
        let now = self.clock.now_millis();
        let expires_at_millis = self.expiry(ttl);
        let mut map = self.data.lock().unwrap();

        let count = match Self::live(&mut map, key, now) {
            Some(entry) => Self::parse_count(key, entry)? + 1,
            None => 1,
        };
        map.insert(key.to_string(), Entry { value: count.to_string(), expires_at_millis });
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (InMemoryStore, ManualClock) {
        let clock = ManualClock::new();
        (InMemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn set_get_roundtrip_and_expiry() {
        let (store, clock) = store_with_clock();
        store.set("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn set_if_absent_respects_live_values_but_not_expired_ones() {
        let (store, clock) = store_with_clock();
        assert!(store.set_if_absent("k", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));

        clock.advance(Duration::from_secs(5));
        assert!(store.set_if_absent("k", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn delete_if_equals_checks_value() {
        let (store, _clock) = store_with_clock();
        store.set("k", "token-a", Duration::from_secs(5)).await.unwrap();
        assert!(!store.delete_if_equals("k", "token-b").await.unwrap());
        assert!(store.exists("k").await.unwrap());
        assert!(store.delete_if_equals("k", "token-a").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn fixed_window_denies_without_incrementing() {
        let (store, clock) = store_with_clock();
        let window = Duration::from_secs(60);

        for i in 1..=3u64 {
            let r = store.fixed_window_incr("k", 3, window).await.unwrap();
            assert!(r.admitted);
            assert_eq!(r.count, i);
        }
        let denied = store.fixed_window_incr("k", 3, window).await.unwrap();
        assert!(!denied.admitted);
        assert_eq!(denied.count, 3);

        // Window rolls over: fresh count.
        clock.advance(window);
        let r = store.fixed_window_incr("k", 3, window).await.unwrap();
        assert!(r.admitted);
        assert_eq!(r.count, 1);
        assert_eq!(r.ttl, window);
    }

    #[tokio::test]
    async fn fixed_window_ttl_counts_down() {
        let (store, clock) = store_with_clock();
        let window = Duration::from_secs(60);
        store.fixed_window_incr("k", 5, window).await.unwrap();

        clock.advance(Duration::from_secs(20));
        let r = store.fixed_window_incr("k", 5, window).await.unwrap();
        assert_eq!(r.ttl, Duration::from_secs(40));
    }

    #[tokio::test]
    async fn incr_with_ttl_refreshes_expiry() {
        let (store, clock) = store_with_clock();
        let ttl = Duration::from_secs(30);
        assert_eq!(store.incr_with_ttl("k", ttl).await.unwrap(), 1);

        clock.advance(Duration::from_secs(20));
        assert_eq!(store.incr_with_ttl("k", ttl).await.unwrap(), 2);

        // The second increment pushed the expiry out again.
        clock.advance(Duration::from_secs(20));
        assert_eq!(store.incr_with_ttl("k", ttl).await.unwrap(), 3);

        clock.advance(ttl);
        assert_eq!(store.incr_with_ttl("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn counter_ops_reject_non_numeric_values() {
        let (store, _clock) = store_with_clock();
        store.set("k", "not-a-number", Duration::from_secs(5)).await.unwrap();
        let err = store.incr_with_ttl("k", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, InMemoryStoreError::NotAnInteger { .. }));
    }
}
