// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Admission engine coordinator.
//!
//! The [`AdmissionEngine`] ties the components together around one control
//! flow per request:
//!
//! ```text
//! admit ──► rate limiter ──rejected──► RateLimitExceeded
//!   │
//!   ▼ allowed
//! tiered cache (local ──► shared) ──hit──► response
//!   │
//!   ▼ miss
//! provider pool (select ──► execute ──► failover) ──► write back ──► response
//! ```
//!
//! Construction is explicit: the host builds the counter store, the
//! concrete providers, and the engine, and owns start/shutdown. Nothing
//! here is a process-wide singleton.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use admission_engine::{AdmissionConfig, AdmissionEngine, FailurePolicy};
//!
//! # async fn example(providers: Vec<Arc<dyn admission_engine::Provider>>) {
//! let config = AdmissionConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     ..AdmissionConfig::new(FailurePolicy::Open)
//! };
//!
//! let engine = AdmissionEngine::connect(config, providers)
//!     .await
//!     .expect("counter store unreachable");
//! engine.start();
//!
//! match engine.fetch("client-42", "standard", "/assets/app.js").await {
//!     Ok(response) => println!("{} bytes", response.body.len()),
//!     Err(err) => eprintln!("rejected: {err}"),
//! }
//!
//! engine.shutdown();
//! # }
//! ```

mod types;

pub use types::{AdmissionError, EngineState, HealthCheck};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::TieredCache;
use crate::config::AdmissionConfig;
use crate::limiter::{Decision, RateLimiter};
use crate::pool::{InvalidationReport, OriginRequest, OriginResponse, Provider, ProviderPool};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::stats::{ScopeSnapshot, StatsRecorder};
use crate::store::{CounterStore, GuardedStore, MemoryCounterStore, RedisCounterStore, StoreError};

pub struct AdmissionEngine {
    limiter: RateLimiter,
    cache: TieredCache,
    pool: Arc<ProviderPool>,
    stats: Arc<StatsRecorder>,
    store: Arc<dyn CounterStore>,
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
}

impl AdmissionEngine {
    /// Build an engine over an explicit counter store. This is the fully
    /// dependency-injected constructor; [`connect`](Self::connect) is the
    /// convenience path that builds the store from config.
    pub fn new(
        config: AdmissionConfig,
        store: Arc<dyn CounterStore>,
        providers: Vec<Arc<dyn Provider>>,
    ) -> Self {
        let stats = Arc::new(StatsRecorder::new());

        let limiter = RateLimiter::new(
            Arc::clone(&store),
            config.limiter.clone(),
            config.failure_policy,
            Arc::clone(&stats),
        );
        let cache = TieredCache::new(Arc::clone(&store), &config.cache, Arc::clone(&stats));
        let pool = Arc::new(ProviderPool::new(
            providers,
            config.pool.clone(),
            Arc::clone(&stats),
        ));

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        crate::metrics::record_engine_state("Created");

        Self {
            limiter,
            cache,
            pool,
            stats,
            store,
            state_tx,
            state_rx,
        }
    }

    /// Build the counter store from config and construct the engine:
    /// Redis (circuit-guarded) when `redis_url` is set, the in-process
    /// store otherwise.
    pub async fn connect(
        config: AdmissionConfig,
        providers: Vec<Arc<dyn Provider>>,
    ) -> Result<Self, StoreError> {
        crate::metrics::record_engine_state("Connecting");

        let store: Arc<dyn CounterStore> = match config.redis_url.as_deref() {
            Some(url) => {
                info!(url, prefix = ?config.redis_prefix, "connecting to counter store");
                let redis = RedisCounterStore::with_options(
                    url,
                    config.redis_prefix.as_deref(),
                    Duration::from_millis(config.store_op_timeout_ms),
                )
                .await?;
                Arc::new(GuardedStore::new(
                    Arc::new(redis),
                    CircuitBreaker::with_defaults("counter_store"),
                ))
            }
            None => {
                info!("no counter store configured, using in-process store");
                Arc::new(MemoryCounterStore::new())
            }
        };

        let engine = Self::new(config, store, providers);
        engine.set_state(EngineState::Ready);
        Ok(engine)
    }

    /// Start background work (provider health probes) and begin serving.
    pub fn start(&self) {
        Arc::clone(&self.pool).spawn_probes();
        self.set_state(EngineState::Running);
        info!("admission engine running");
    }

    /// Stop probes and mark the engine down. In-flight store calls run to
    /// completion; nothing is cancelled mid-write.
    pub fn shutdown(&self) {
        self.set_state(EngineState::ShuttingDown);
        self.pool.shutdown();
        info!("admission engine shut down");
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), EngineState::Ready | EngineState::Running)
    }

    // --- Request path ---

    /// Rate-limit gate alone: `Ok(())` to proceed.
    pub async fn admit(&self, identity: &str, tier: &str) -> Result<(), AdmissionError> {
        match self.limiter.check(identity, tier).await {
            Decision::Allowed { .. } => Ok(()),
            Decision::Rejected { retry_after } => {
                Err(AdmissionError::RateLimitExceeded { retry_after })
            }
        }
    }

    /// Full admission flow: rate limit, tiered cache, provider fetch with
    /// write-back. The cache key is the request path.
    pub async fn fetch(
        &self,
        identity: &str,
        tier: &str,
        path: &str,
    ) -> Result<OriginResponse, AdmissionError> {
        let _timer = crate::time_operation!("engine", "fetch");
        self.admit(identity, tier).await?;

        let request = OriginRequest::new(path);
        let response = self
            .cache
            .get_or_fetch(path, None, || self.pool.execute(&request))
            .await?;
        Ok(response)
    }

    /// Drop `paths` from both cache tiers and broadcast the invalidation
    /// to every healthy provider. Cache-side failures are logged and do
    /// not block the broadcast; the report lists per-provider outcomes.
    pub async fn invalidate(
        &self,
        paths: &[String],
    ) -> Result<InvalidationReport, AdmissionError> {
        for path in paths {
            if let Err(err) = self.cache.delete(path).await {
                warn!(path, error = %err, "shared cache delete failed during invalidation");
            }
        }

        let report = self.pool.invalidate(paths).await?;
        Ok(report)
    }

    // --- Component access (for hosts wiring their own endpoints) ---

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ProviderPool> {
        &self.pool
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<StatsRecorder> {
        &self.stats
    }

    /// Per-scope counter snapshot for host `/stats` endpoints.
    #[must_use]
    pub fn snapshot_stats(&self) -> HashMap<String, ScopeSnapshot> {
        self.stats.snapshot_all()
    }

    /// Probe the counter store and collect component state.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let ready = self.is_ready();

        let start = Instant::now();
        let (store_connected, store_latency_ms) = match self.store.ping().await {
            Ok(()) => (true, Some(start.elapsed().as_millis() as u64)),
            Err(_) => (false, None),
        };

        let providers = self.pool.records();
        let healthy_providers = providers.iter().filter(|p| p.healthy).count();

        let healthy = matches!(state, EngineState::Running)
            && store_connected
            && (providers.is_empty() || healthy_providers > 0);

        HealthCheck {
            state: state.to_string(),
            ready,
            healthy,
            store_connected,
            store_latency_ms,
            providers,
            healthy_providers,
            cache_local_entries: self.cache.local_len(),
        }
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        crate::metrics::record_engine_state(&state.to_string());
    }
}
