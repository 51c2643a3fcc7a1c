use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Counter store operation timed out")]
    Timeout,
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
    #[error("Counter store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for errors where the store could not be reached at all, as
    /// opposed to a malformed command or value. The rate limiter's
    /// fail-open/fail-closed policy applies to every variant, but callers
    /// sometimes want to log connection loss distinctly.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// A value read from the shared tier, along with its remaining lifetime.
///
/// The remaining TTL is what lets the tiered cache cap the local copy at
/// `min(local_ttl, remaining_shared_ttl)` so the local tier never outlives
/// the shared entry it was populated from.
#[derive(Debug, Clone)]
pub struct StoredValue {
    pub data: Vec<u8>,
    /// `None` when the backend reports no expiry on the key.
    pub remaining_ttl: Option<Duration>,
}

/// Minimal primitive set required from the shared counter store.
///
/// Any key-value store providing atomic increment with TTL, get/set/delete
/// with TTL, sorted-set add/remove-by-score/cardinality, and key enumeration
/// by pattern is a valid backend. [`MemoryCounterStore`] implements it for
/// tests and single-node deployments; [`RedisCounterStore`] for shared
/// multi-instance deployments.
///
/// [`MemoryCounterStore`]: super::memory::MemoryCounterStore
/// [`RedisCounterStore`]: super::redis::RedisCounterStore
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it with `ttl` on first use.
    /// Returns the counter value after the increment.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete a batch of keys. Default implementation falls back to
    /// sequential deletes; backends with pipelining should override.
    /// Returns the number of keys the backend reported removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(keys.len() as u64)
    }

    /// Add `member` to the sorted set at `key` with `score`, refreshing the
    /// set's TTL so an idle identity's window eventually expires.
    async fn zadd(&self, key: &str, member: &str, score: f64, ttl: Duration)
        -> Result<(), StoreError>;

    /// Remove members with `min <= score <= max`. Returns how many were removed.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError>;

    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// Enumerate keys matching a glob pattern (e.g. `cache:user:*`).
    /// The shared store has no native prefix-delete, so prefix invalidation
    /// is scan-then-delete.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Connectivity probe for health checks.
    async fn ping(&self) -> Result<(), StoreError>;
}
