//! # Admission Engine
//!
//! A multi-tier request admission and caching layer: rate limiting, a
//! two-level cache, and provider failover, coordinated over a shared
//! counter store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Rate Limiter                          │
//! │  • Fixed or sliding window per identity, per-tier limits   │
//! │  • Fail-open / fail-closed when the store is unreachable   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ allowed
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Tiered Cache                          │
//! │  • Local: bounded in-process map, oldest-inserted eviction │
//! │  • Shared: counter store, TTL-capped local promotion       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ miss
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Provider Pool                           │
//! │  • Healthy providers ranked by rolling latency (EWMA)      │
//! │  • Failover on error, background health probes             │
//! │  • Best-effort invalidation broadcast                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every step is observed by the [`StatsRecorder`] and the `metrics`
//! crate. The shared counter store is the only external collaborator;
//! anything exposing atomic increment, TTL'd get/set, sorted sets, and
//! pattern scans can back it ([`RedisCounterStore`] in production,
//! [`MemoryCounterStore`] in tests and single-node setups).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use admission_engine::{AdmissionConfig, AdmissionEngine, FailurePolicy, Provider};
//!
//! # async fn example(providers: Vec<Arc<dyn Provider>>) {
//! let config = AdmissionConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     ..AdmissionConfig::new(FailurePolicy::Open)
//! };
//!
//! let engine = AdmissionEngine::connect(config, providers).await.unwrap();
//! engine.start();
//!
//! // Rate limit → cache → provider, in one call.
//! let response = engine.fetch("client-42", "standard", "/assets/app.js").await;
//!
//! engine.shutdown();
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the [`AdmissionEngine`] coordinator
//! - [`limiter`]: fixed/sliding window rate limiting
//! - [`cache`]: two-level read-through/write-through cache
//! - [`pool`]: provider health, selection, failover, invalidation
//! - [`store`]: counter-store trait and backends
//! - [`stats`]: per-scope hit/miss/error counters
//! - [`resilience`]: retry presets and the store circuit breaker
//! - [`config`]: serde-deserializable engine configuration

pub mod cache;
pub mod config;
pub mod engine;
pub mod limiter;
pub mod metrics;
pub mod pool;
pub mod resilience;
pub mod stats;
pub mod store;

pub use cache::TieredCache;
pub use config::{AdmissionConfig, FailurePolicy, LimitStrategy, TierLimit};
pub use engine::{AdmissionEngine, AdmissionError, EngineState, HealthCheck};
pub use limiter::{Decision, RateLimiter};
pub use pool::{
    InvalidationReport, OriginRequest, OriginResponse, Provider, ProviderError, ProviderPool,
    ProviderRecord, SelectCriteria,
};
pub use stats::{ScopeSnapshot, StatsRecorder};
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreError, StoredValue};
