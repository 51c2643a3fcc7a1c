//! Configuration for the admission engine.
//!
//! # Example
//!
//! ```
//! use admission_engine::config::{AdmissionConfig, FailurePolicy};
//!
//! // Minimal config: only the store failure policy has no default,
//! // because failing open vs. closed is a product decision.
//! let config = AdmissionConfig::new(FailurePolicy::Open);
//! assert_eq!(config.cache.local_ttl_secs, 60);
//!
//! // Full config
//! let config = AdmissionConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     store_op_timeout_ms: 200,
//!     ..AdmissionConfig::new(FailurePolicy::Closed)
//! };
//! ```

use std::collections::HashMap;

use serde::Deserialize;

/// What the rate limiter does when the counter store is unreachable.
///
/// There is deliberately no serde default: a deployment must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Allow the request through (availability over enforcement).
    Open,
    /// Reject the request (enforcement over availability).
    Closed,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Window-counting scheme for the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimitStrategy {
    /// Discrete non-overlapping windows, one counter per window.
    #[default]
    Fixed,
    /// Exact timestamps in a sorted set; continuously moving boundary.
    Sliding,
}

/// Extra short-window counter checked before the primary window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BurstLimit {
    pub limit: u32,
    #[serde(default = "default_burst_window_secs")]
    pub window_secs: u64,
}

/// Per-tier request allowance.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TierLimit {
    pub limit: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub burst: Option<BurstLimit>,
}

impl TierLimit {
    /// Sustained requests per second this tier allows. Used to pick the
    /// most restrictive tier as the unknown-tier fallback.
    #[must_use]
    pub fn rate(&self) -> f64 {
        if self.window_secs == 0 {
            0.0
        } else {
            f64::from(self.limit) / self.window_secs as f64
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    #[serde(default)]
    pub strategy: LimitStrategy,

    /// Tier name → allowance. Unknown tiers fall back to the most
    /// restrictive entry.
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, TierLimit>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            strategy: LimitStrategy::default(),
            tiers: default_tiers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Local tier entry bound; oldest-inserted evicted beyond this.
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// Local tier TTL ceiling (staleness window, seconds).
    #[serde(default = "default_local_ttl_secs")]
    pub local_ttl_secs: u64,

    /// Default shared tier TTL (seconds) when callers don't pass one.
    #[serde(default = "default_shared_ttl_secs")]
    pub shared_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_max_entries: default_local_max_entries(),
            local_ttl_secs: default_local_ttl_secs(),
            shared_ttl_secs: default_shared_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Background health-probe interval per provider (seconds).
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Consecutive failures (probe or operational) before Unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Max providers tried per execute() before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// EWMA smoothing factor for the rolling latency estimate.
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            failure_threshold: default_failure_threshold(),
            max_attempts: default_max_attempts(),
            ewma_alpha: default_ewma_alpha(),
        }
    }
}

/// Descriptor for one provider, consumed by the host's registry at
/// startup. Credentials are opaque to the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub region: String,
    pub endpoint: String,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Counter store connection string. `None` selects the in-process
    /// store (tests, single-node deployments).
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Optional key prefix when sharing a store with other applications.
    #[serde(default)]
    pub redis_prefix: Option<String>,

    /// Deadline per counter-store operation (milliseconds).
    #[serde(default = "default_store_op_timeout_ms")]
    pub store_op_timeout_ms: u64,

    /// Required: behavior when the counter store is unreachable.
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl AdmissionConfig {
    /// Defaults everywhere a default is safe; the failure policy is the
    /// one decision the caller must make.
    #[must_use]
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            redis_url: None,
            redis_prefix: None,
            store_op_timeout_ms: default_store_op_timeout_ms(),
            failure_policy,
            limiter: LimiterConfig::default(),
            cache: CacheConfig::default(),
            pool: PoolConfig::default(),
            providers: Vec::new(),
        }
    }
}

fn default_store_op_timeout_ms() -> u64 { 250 }
fn default_burst_window_secs() -> u64 { 10 }
fn default_local_max_entries() -> usize { 10_000 }
fn default_local_ttl_secs() -> u64 { 60 }
fn default_shared_ttl_secs() -> u64 { 300 }
fn default_probe_interval_secs() -> u64 { 30 }
fn default_failure_threshold() -> u32 { 3 }
fn default_max_attempts() -> usize { 3 }
fn default_ewma_alpha() -> f64 { 0.3 }

fn default_tiers() -> HashMap<String, TierLimit> {
    HashMap::from([
        (
            "free".to_string(),
            TierLimit {
                limit: 60,
                window_secs: 60,
                burst: Some(BurstLimit { limit: 15, window_secs: 10 }),
            },
        ),
        (
            "standard".to_string(),
            TierLimit {
                limit: 600,
                window_secs: 60,
                burst: Some(BurstLimit { limit: 120, window_secs: 10 }),
            },
        ),
        (
            "premium".to_string(),
            TierLimit {
                limit: 3000,
                window_secs: 60,
                burst: None,
            },
        ),
    ])
}
