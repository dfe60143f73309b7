//! Conflict-safe entity updates: distributed lock plus optimistic versioning.
//!
//! The lock serializes updaters across processes; the version precondition on
//! the write catches any writer that bypassed the lock (and the narrow window
//! between lock-acquire and version-read). Defense in depth, not redundancy.
//!
//! The optimistic retry loop is bounded and internal: version mismatches are
//! retried transparently up to the configured bound, then surfaced as
//! [`CoordinationError::OptimisticConflictExhausted`]. The lock is released
//! exactly once, in a cleanup path, however many retries ran inside it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::GuardConfig;
use crate::error::CoordinationError;
use crate::lock::DistributedLock;
use crate::store::KeyValueStore;

/// Prefix for per-entity update lock keys.
pub const UPDATE_LOCK_PREFIX: &str = "entity-update";

/// An entity value paired with its integer version stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Errors reported by a versioned persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The version precondition failed: a third party wrote in between.
    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u64, actual: u64 },
    /// The backend itself failed.
    #[error("repository backend error")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Versioned read/write seam owned by the storage layer.
///
/// A write succeeds only if `expected_version` matches the persisted version;
/// every successful write increments the version by exactly one.
#[async_trait]
pub trait VersionedRepository: Send + Sync {
    type Entity: Clone + Send + Sync;

    /// Read the entity with its current version.
    async fn load(&self, id: &str) -> Result<Option<Versioned<Self::Entity>>, RepositoryError>;

    /// Write back with the version as precondition.
    async fn store(
        &self,
        id: &str,
        entity: Self::Entity,
        expected_version: u64,
    ) -> Result<Versioned<Self::Entity>, RepositoryError>;
}

/// Serializes and safely retries concurrent updates to one logical entity.
pub struct ConcurrencyGuard<S, R> {
    lock: DistributedLock<S>,
    repo: Arc<R>,
    config: GuardConfig,
}

impl<S, R> ConcurrencyGuard<S, R>
where
    S: KeyValueStore,
    R: VersionedRepository,
{
    pub fn new(store: Arc<S>, repo: Arc<R>, config: GuardConfig) -> Self {
        Self { lock: DistributedLock::new(store), repo, config }
    }

    /// Apply `mutate` to the entity under the per-entity lock.
    ///
    /// Fails fast with [`CoordinationError::LockAcquisitionFailed`] when the
    /// entity is being updated elsewhere; the caller decides whether to back
    /// off and retry. `mutate` may run more than once and must not carry
    /// side effects beyond the entity itself.
    pub async fn update<F>(
        &self,
        entity_id: &str,
        mut mutate: F,
    ) -> Result<Versioned<R::Entity>, CoordinationError>
    where
        F: FnMut(&mut R::Entity) + Send,
    {
        let lock_key = format!("{UPDATE_LOCK_PREFIX}:{entity_id}");
        let Some(token) = self.lock.acquire(&lock_key, self.config.lock_ttl()).await? else {
            return Err(CoordinationError::LockAcquisitionFailed { key: lock_key });
        };

        let result = self.write_with_retries(entity_id, &mut mutate).await;

        // Single release on every path; a failed release is the TTL's problem.
        match self.lock.release(&lock_key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %lock_key, "update lock expired before release"),
            Err(err) => warn!(key = %lock_key, error = %err, "update lock release failed"),
        }
        result
    }

    async fn write_with_retries<F>(
        &self,
        entity_id: &str,
        mutate: &mut F,
    ) -> Result<Versioned<R::Entity>, CoordinationError>
    where
        F: FnMut(&mut R::Entity) + Send,
    {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            let Some(mut current) = self
                .repo
                .load(entity_id)
                .await
                .map_err(CoordinationError::store_unavailable)?
            else {
                return Err(CoordinationError::EntityNotFound { entity_id: entity_id.into() });
            };

            mutate(&mut current.value);

            match self.repo.store(entity_id, current.value, current.version).await {
                Ok(updated) => {
                    debug!(entity_id, version = updated.version, attempt, "entity updated");
                    return Ok(updated);
                }
                Err(RepositoryError::VersionMismatch { expected, actual }) => {
                    // Only possible for a writer that bypassed the lock, or
                    // one that wrote between lock-acquire and our read.
                    debug!(entity_id, expected, actual, attempt, "optimistic conflict, retrying");
                }
                Err(err @ RepositoryError::Backend(_)) => {
                    return Err(CoordinationError::store_unavailable(err));
                }
            }
        }
        Err(CoordinationError::OptimisticConflictExhausted {
            entity_id: entity_id.into(),
            attempts,
        })
    }
}

/// In-memory [`VersionedRepository`] for tests and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryRepository<T> {
    rows: Mutex<HashMap<String, Versioned<T>>>,
}

impl<T: Clone + Send + Sync> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self { rows: Mutex::new(HashMap::new()) }
    }

    /// Create an entity at version 1, replacing any previous row.
    pub fn insert(&self, id: impl Into<String>, value: T) {
        self.rows.lock().unwrap().insert(id.into(), Versioned { value, version: 1 });
    }

    /// Write directly, bypassing any lock — models a misbehaving writer.
    pub fn write_unguarded(&self, id: &str, value: T) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(id) {
            row.value = value;
            row.version += 1;
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> VersionedRepository for InMemoryRepository<T> {
    type Entity = T;

    async fn load(&self, id: &str) -> Result<Option<Versioned<T>>, RepositoryError> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }

    async fn store(
        &self,
        id: &str,
        entity: T,
        expected_version: u64,
    ) -> Result<Versioned<T>, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(id).ok_or(RepositoryError::VersionMismatch {
            expected: expected_version,
            actual: 0,
        })?;
        if row.version != expected_version {
            return Err(RepositoryError::VersionMismatch {
                expected: expected_version,
                actual: row.version,
            });
        }
        row.value = entity;
        row.version += 1;
        Ok(row.clone())
    }
}
