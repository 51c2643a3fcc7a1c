//! Circuit-breaker decorator for a counter store.
//!
//! Wraps any [`CounterStore`] so that a run of failures trips the breaker
//! and subsequent calls fail fast with [`StoreError::Unavailable`] instead
//! of paying the operation deadline. The limiter and cache see an ordinary
//! store error and apply their normal fallback policies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{CounterStore, StoreError, StoredValue};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitError};

pub struct GuardedStore {
    inner: Arc<dyn CounterStore>,
    circuit: CircuitBreaker,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn CounterStore>, circuit: CircuitBreaker) -> Self {
        Self { inner, circuit }
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    fn flatten<T>(result: Result<T, CircuitError<StoreError>>) -> Result<T, StoreError> {
        match result {
            Ok(v) => Ok(v),
            Err(CircuitError::Rejected) => {
                Err(StoreError::Unavailable("circuit breaker open".to_string()))
            }
            Err(CircuitError::Inner(e)) => Err(e),
        }
    }
}

#[async_trait]
impl CounterStore for GuardedStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.incr(key, ttl)).await)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.get(key)).await)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.set(key, value, ttl)).await)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.delete(key)).await)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.delete_many(keys)).await)
    }

    async fn zadd(
        &self,
        key: &str,
        member: &str,
        score: f64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.zadd(key, member, score, ttl)).await)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.zremrangebyscore(key, min, max)).await)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.zcard(key)).await)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Self::flatten(self.circuit.call(|| self.inner.scan_keys(pattern)).await)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        // Probes bypass the breaker: a successful ping while open is how
        // recovery gets noticed by health checks.
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitConfig;
    use crate::store::memory::MemoryCounterStore;

    fn guarded() -> GuardedStore {
        GuardedStore::new(
            Arc::new(MemoryCounterStore::new()),
            CircuitBreaker::new("test_store", CircuitConfig::test()),
        )
    }

    #[tokio::test]
    async fn test_passes_through_to_inner() {
        let store = guarded();
        assert_eq!(store.incr("c", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.incr("c", Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(store.circuit().successes(), 2);
    }

    #[tokio::test]
    async fn test_rejection_maps_to_unavailable() {
        let result = GuardedStore::flatten::<u64>(Err(CircuitError::Rejected));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let store = guarded();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        // Type mismatch from the inner store surfaces unchanged.
        let err = store.incr("k", Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.circuit().failures(), 1);
    }
}
