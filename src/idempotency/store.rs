//! Idempotency store contract and in-memory backend

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyStoreError {
    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),

    #[error("Idempotency store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for IdempotencyStoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                IdempotencyStoreError::Unavailable(e.to_string())
            }
            other => IdempotencyStoreError::Backend(other.to_string()),
        }
    }
}

/// Key-value store with TTL and an atomic set-if-absent
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Store `value` under `key` only if no live entry exists.
    ///
    /// Must be a single compare-and-swap: of any number of concurrent callers
    /// with the same key, exactly one gets `true`.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, IdempotencyStoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, IdempotencyStoreError>;

    /// Unconditional write, replacing value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration)
    -> Result<(), IdempotencyStoreError>;

    async fn delete(&self, key: &str) -> Result<(), IdempotencyStoreError>;
}

/// In-process store; an expired entry counts as absent.
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired reservation, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, deadline)| *deadline > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, IdempotencyStoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so check and insert are one step
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().1 > now {
                    return Ok(false);
                }
                e.insert((value.to_string(), now + ttl));
                Ok(true)
            }
            Entry::Vacant(e) => {
                e.insert((value.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, IdempotencyStoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.1 > now)
            .map(|e| e.0.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), IdempotencyStoreError> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), IdempotencyStoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
