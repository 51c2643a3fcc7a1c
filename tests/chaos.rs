//! Failure-scenario tests for the admission engine.
//!
//! Uses wrapper stores with precise error injection to exercise the
//! degraded paths: counter-store death mid-run, fail-open vs fail-closed,
//! best-effort cache writes, circuit-breaker fast-fail, provider flapping.
//!
//! ```bash
//! cargo test --test chaos
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use admission_engine::config::{
    CacheConfig, FailurePolicy, LimitStrategy, LimiterConfig, PoolConfig, TierLimit,
};
use admission_engine::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig};
use admission_engine::store::{GuardedStore, StoredValue};
use admission_engine::{
    CounterStore, MemoryCounterStore, OriginRequest, OriginResponse, Provider, ProviderError,
    ProviderPool, RateLimiter, StatsRecorder, StoreError, TieredCache,
};

// =============================================================================
// Failing store wrapper - precise error injection
// =============================================================================

/// Wraps a working store and starts failing every call once `kill` is
/// flipped, or after a fixed number of calls.
struct FlakyStore {
    inner: MemoryCounterStore,
    call_count: AtomicU64,
    /// Fail every call strictly after this many calls (u64::MAX = never).
    fail_after: AtomicU64,
}

impl FlakyStore {
    fn healthy() -> Self {
        Self {
            inner: MemoryCounterStore::new(),
            call_count: AtomicU64::new(0),
            fail_after: AtomicU64::new(u64::MAX),
        }
    }

    fn kill(&self) {
        self.fail_after.store(0, Ordering::SeqCst);
    }

    fn fail_in(&self, calls: u64) {
        self.fail_after
            .store(self.call_count.load(Ordering::SeqCst) + calls, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.fail_after.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected store failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.incr(key, ttl).await
    }
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }
    async fn zadd(&self, key: &str, member: &str, score: f64, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.zadd(key, member, score, ttl).await
    }
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.zremrangebyscore(key, min, max).await
    }
    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.zcard(key).await
    }
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.scan_keys(pattern).await
    }
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.ping().await
    }
}

fn one_tier(limit: u32, window_secs: u64) -> HashMap<String, TierLimit> {
    HashMap::from([(
        "basic".to_string(),
        TierLimit { limit, window_secs, burst: None },
    )])
}

fn limiter_over(store: Arc<dyn CounterStore>, policy: FailurePolicy) -> RateLimiter {
    RateLimiter::new(
        store,
        LimiterConfig {
            strategy: LimitStrategy::Fixed,
            tiers: one_tier(100, 60),
        },
        policy,
        Arc::new(StatsRecorder::new()),
    )
}

// =============================================================================
// Limiter under store death
// =============================================================================

#[tokio::test]
async fn limiter_fail_open_survives_store_death() {
    let store = Arc::new(FlakyStore::healthy());
    let limiter = limiter_over(store.clone(), FailurePolicy::Open);

    assert!(limiter.check("c", "basic").await.is_allowed());

    store.kill();
    // Store gone: fail-open keeps admitting.
    for _ in 0..5 {
        assert!(limiter.check("c", "basic").await.is_allowed());
    }
}

#[tokio::test]
async fn limiter_fail_closed_rejects_on_store_death() {
    let store = Arc::new(FlakyStore::healthy());
    let limiter = limiter_over(store.clone(), FailurePolicy::Closed);

    assert!(limiter.check("c", "basic").await.is_allowed());

    store.kill();
    for _ in 0..5 {
        let decision = limiter.check("c", "basic").await;
        assert!(!decision.is_allowed());
        assert!(decision.retry_after().is_some());
    }
}

#[tokio::test]
async fn limiter_recovers_when_store_returns() {
    let store = Arc::new(FlakyStore::healthy());
    let limiter = limiter_over(store.clone(), FailurePolicy::Closed);

    store.kill();
    assert!(!limiter.check("c", "basic").await.is_allowed());

    // Store comes back: normal counting resumes.
    store.fail_after.store(u64::MAX, Ordering::SeqCst);
    assert!(limiter.check("c", "basic").await.is_allowed());
}

// =============================================================================
// Cache under store failures
// =============================================================================

#[tokio::test]
async fn cache_set_survives_shared_write_failure() {
    let store = Arc::new(FlakyStore::healthy());
    let stats = Arc::new(StatsRecorder::new());
    let cache = TieredCache::new(store.clone(), &CacheConfig::default(), stats.clone());

    // Exactly the next (shared set) call fails.
    store.fail_in(0);
    cache.set("k", &"v".to_string(), None).await;

    // Local tier still serves this process.
    let got: Option<String> = cache.get("k").await;
    assert_eq!(got.as_deref(), Some("v"));
    assert_eq!(stats.snapshot("cache.shared").errors, 1);
}

#[tokio::test]
async fn cache_read_failure_treated_as_miss() {
    let store = Arc::new(FlakyStore::healthy());
    let cache = TieredCache::new(
        store.clone(),
        &CacheConfig::default(),
        Arc::new(StatsRecorder::new()),
    );

    store.kill();
    // get() falls through cleanly; get_or_fetch reaches the fetch path.
    let fetched: Result<String, ProviderError> = cache
        .get_or_fetch("k", None, || async { Ok("from-origin".to_string()) })
        .await;
    assert_eq!(fetched.unwrap(), "from-origin");
}

// =============================================================================
// Circuit breaker fast-fail
// =============================================================================

#[tokio::test]
async fn circuit_breaker_trips_and_limiter_policy_applies() {
    let flaky = Arc::new(FlakyStore::healthy());
    let guarded = Arc::new(GuardedStore::new(
        flaky.clone(),
        CircuitBreaker::new(
            "counter_store",
            CircuitConfig {
                failure_threshold: 2,
                success_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
            },
        ),
    ));
    let limiter = limiter_over(guarded.clone(), FailurePolicy::Open);

    flaky.kill();
    // Hammer until the breaker opens; fail-open admits throughout.
    for _ in 0..10 {
        assert!(limiter.check("c", "basic").await.is_allowed());
    }
    assert!(
        guarded.circuit().rejections() > 0,
        "breaker should be rejecting calls up front by now"
    );

    // Rejected calls never reached the store.
    let reached = flaky.call_count.load(Ordering::SeqCst);
    assert!(reached < 10, "store saw {reached} calls, breaker saved the rest");
}

// =============================================================================
// Provider flapping
// =============================================================================

struct FlappyProvider {
    name: String,
    down: AtomicBool,
}

#[async_trait]
impl Provider for FlappyProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn region(&self) -> &str {
        "eu"
    }
    async fn execute(&self, request: &OriginRequest) -> Result<OriginResponse, ProviderError> {
        if self.down.load(Ordering::SeqCst) {
            Err(ProviderError::Unreachable("flapping".into()))
        } else {
            Ok(OriginResponse {
                body: request.path.as_bytes().to_vec(),
                content_type: None,
            })
        }
    }
    async fn health_probe(&self) -> Result<(), ProviderError> {
        if self.down.load(Ordering::SeqCst) {
            Err(ProviderError::Unreachable("flapping".into()))
        } else {
            Ok(())
        }
    }
    async fn invalidate(&self, _: &[String]) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[tokio::test]
async fn provider_flap_down_then_up() {
    let flappy = Arc::new(FlappyProvider {
        name: "flappy".into(),
        down: AtomicBool::new(false),
    });
    let steady = Arc::new(FlappyProvider {
        name: "steady".into(),
        down: AtomicBool::new(false),
    });
    let providers: Vec<Arc<dyn Provider>> = vec![flappy.clone(), steady];
    let pool = Arc::new(ProviderPool::new(
        providers,
        PoolConfig { failure_threshold: 2, ..PoolConfig::default() },
        Arc::new(StatsRecorder::new()),
    ));

    // Both healthy: requests succeed.
    pool.execute(&OriginRequest::new("/1")).await.unwrap();

    // Flappy goes down; operations fail over, probes mark it unhealthy.
    flappy.down.store(true, Ordering::SeqCst);
    pool.probe_one(0).await;
    pool.probe_one(0).await;
    assert_eq!(pool.healthy_count(), 1);
    pool.execute(&OriginRequest::new("/2")).await.unwrap();

    // Flappy recovers; a single probe restores it to the rotation.
    flappy.down.store(false, Ordering::SeqCst);
    pool.probe_one(0).await;
    assert_eq!(pool.healthy_count(), 2);
}

#[tokio::test]
async fn requests_keep_flowing_while_one_provider_dies() {
    let dying = Arc::new(FlappyProvider {
        name: "dying".into(),
        down: AtomicBool::new(false),
    });
    let healthy = Arc::new(FlappyProvider {
        name: "healthy".into(),
        down: AtomicBool::new(false),
    });
    let providers: Vec<Arc<dyn Provider>> = vec![dying.clone(), healthy];
    let pool = Arc::new(ProviderPool::new(
        providers,
        PoolConfig::default(),
        Arc::new(StatsRecorder::new()),
    ));

    for i in 0..20 {
        if i == 5 {
            dying.down.store(true, Ordering::SeqCst);
        }
        // Every request succeeds regardless of the mid-run death.
        pool.execute(&OriginRequest::new(&format!("/{i}"))).await.unwrap();
    }
}
