//! Shared test helpers.
#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keyfence::store::InMemoryStoreError;
use keyfence::{InMemoryStore, KeyValueStore, WindowReservation};

/// Route log output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Error surfaced by [`FaultyStore`] while the simulated outage lasts.
#[derive(Debug)]
pub enum FaultyStoreError {
    Outage,
    Inner(InMemoryStoreError),
}

impl fmt::Display for FaultyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outage => write!(f, "simulated store outage"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FaultyStoreError {}

/// An in-memory store that can be taken offline to exercise fail-open and
/// fail-closed paths.
#[derive(Debug)]
pub struct FaultyStore {
    inner: InMemoryStore,
    down: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self { inner, down: AtomicBool::new(false) }
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), FaultyStoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(FaultyStoreError::Outage)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    type Error = FaultyStoreError;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        self.check()?;
        self.inner.get(key).await.map_err(FaultyStoreError::Inner)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error> {
        self.check()?;
        self.inner.set(key, value, ttl).await.map_err(FaultyStoreError::Inner)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await.map_err(FaultyStoreError::Inner)
    }

    async fn delete(&self, key: &str) -> Result<bool, Self::Error> {
        self.check()?;
        self.inner.delete(key).await.map_err(FaultyStoreError::Inner)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, Self::Error> {
        self.check()?;
        self.inner.delete_if_equals(key, expected).await.map_err(FaultyStoreError::Inner)
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        self.check()?;
        self.inner.exists(key).await.map_err(FaultyStoreError::Inner)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        self.check()?;
        self.inner.ttl(key).await.map_err(FaultyStoreError::Inner)
    }

    async fn fixed_window_incr(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowReservation, Self::Error> {
        self.check()?;
        self.inner.fixed_window_incr(key, limit, window).await.map_err(FaultyStoreError::Inner)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, Self::Error> {
        self.check()?;
        self.inner.incr_with_ttl(key, ttl).await.map_err(FaultyStoreError::Inner)
    }
}
