// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request rate limiting against the shared counter store.
//!
//! Two counting schemes, selected by configuration:
//!
//! - **Fixed window**: one counter per `identity:window_index` key,
//!   atomically incremented with a TTL. Charge-first semantics: the
//!   increment happens before the limit comparison, so a rejected request
//!   still consumes a slot in its window. This mirrors the behavior of the
//!   system this engine replaced and is kept deliberately.
//! - **Sliding window**: a per-identity sorted set of request timestamps.
//!   Expired timestamps are pruned on every check; the current request is
//!   added only when under the limit, so rejections do not consume slots.
//!
//! An optional burst limit runs a tighter short-window fixed counter ahead
//! of the primary window.
//!
//! When the store is unreachable the configured [`FailurePolicy`] decides
//! the outcome; there is no hidden default.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::{FailurePolicy, LimitStrategy, LimiterConfig, TierLimit};
use crate::stats::StatsRecorder;
use crate::store::{CounterStore, StoreError};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        /// Slots left in the window, when the store reported a count.
        /// `None` when allowed by the fail-open policy.
        remaining: Option<u32>,
    },
    Rejected {
        /// Epoch seconds after which a retry can succeed.
        retry_after: u64,
    },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// `Some(epoch_secs)` for rejections.
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Allowed { .. } => None,
            Self::Rejected { retry_after } => Some(*retry_after),
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    strategy: LimitStrategy,
    tiers: HashMap<String, TierLimit>,
    /// Most restrictive configured tier; applied to unknown tier names.
    fallback: Option<TierLimit>,
    policy: FailurePolicy,
    stats: Arc<StatsRecorder>,
    /// Disambiguates sliding-window members added in the same microsecond.
    seq: AtomicU64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        config: LimiterConfig,
        policy: FailurePolicy,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        let fallback = config
            .tiers
            .values()
            .copied()
            .min_by(|a, b| a.rate().total_cmp(&b.rate()));
        if fallback.is_none() {
            warn!("limiter tier table is empty, every unknown tier will be rejected");
        }

        Self {
            store,
            strategy: config.strategy,
            tiers: config.tiers,
            fallback,
            policy,
            stats,
            seq: AtomicU64::new(0),
        }
    }

    /// Check whether `identity` may proceed under `tier`'s allowance.
    ///
    /// Unknown tiers get the most restrictive configured allowance.
    /// Infallible: store errors resolve through the failure policy.
    pub async fn check(&self, identity: &str, tier: &str) -> Decision {
        self.check_at(identity, tier, SystemTime::now()).await
    }

    /// [`check`](Self::check) with an explicit clock, for deterministic tests.
    pub async fn check_at(&self, identity: &str, tier: &str, now: SystemTime) -> Decision {
        let Some(limit) = self.resolve_tier(tier) else {
            // No tiers configured at all: nothing to admit against.
            self.stats.record_miss("limiter");
            crate::metrics::record_limit_decision(tier, "rejected");
            return Decision::Rejected { retry_after: epoch_secs(now) + 60 };
        };

        let decision = match self.try_check(identity, limit, now).await {
            Ok(decision) => decision,
            Err(err) => self.apply_policy(identity, limit, now, &err),
        };

        match decision {
            Decision::Allowed { .. } => {
                self.stats.record_hit("limiter");
                crate::metrics::record_limit_decision(tier, "allowed");
            }
            Decision::Rejected { .. } => {
                self.stats.record_miss("limiter");
                crate::metrics::record_limit_decision(tier, "rejected");
            }
        }
        decision
    }

    /// Check a caller-supplied allowance directly, bypassing the tier table.
    pub async fn check_limit(
        &self,
        identity: &str,
        limit: u32,
        window: Duration,
    ) -> Decision {
        let allowance = TierLimit {
            limit,
            window_secs: window.as_secs().max(1),
            burst: None,
        };
        let now = SystemTime::now();
        match self.try_check(identity, allowance, now).await {
            Ok(decision) => decision,
            Err(err) => self.apply_policy(identity, allowance, now, &err),
        }
    }

    /// Administrative clear of every window for an identity: fixed and
    /// burst counters (by pattern) plus the sliding set.
    pub async fn clear(&self, identity: &str) -> Result<u64, StoreError> {
        let mut keys = self.store.scan_keys(&format!("rl:{identity}:*")).await?;
        keys.extend(self.store.scan_keys(&format!("rl:burst:{identity}:*")).await?);
        keys.push(format!("rl:sw:{identity}"));

        let removed = self.store.delete_many(&keys).await?;
        debug!(identity, removed, "cleared rate-limit state");
        Ok(removed)
    }

    fn resolve_tier(&self, tier: &str) -> Option<TierLimit> {
        self.tiers.get(tier).copied().or(self.fallback)
    }

    async fn try_check(
        &self,
        identity: &str,
        allowance: TierLimit,
        now: SystemTime,
    ) -> Result<Decision, StoreError> {
        // Burst window first: a tighter short-window counter that fails
        // fast before the primary window is charged.
        if let Some(burst) = allowance.burst {
            let key_base = format!("rl:burst:{identity}");
            let decision = self
                .fixed_window(&key_base, burst.limit, burst.window_secs, now)
                .await?;
            if let Decision::Rejected { .. } = decision {
                return Ok(decision);
            }
        }

        match self.strategy {
            LimitStrategy::Fixed => {
                let key_base = format!("rl:{identity}");
                self.fixed_window(&key_base, allowance.limit, allowance.window_secs, now)
                    .await
            }
            LimitStrategy::Sliding => {
                self.sliding_window(identity, allowance.limit, allowance.window_secs, now)
                    .await
            }
        }
    }

    async fn fixed_window(
        &self,
        key_base: &str,
        limit: u32,
        window_secs: u64,
        now: SystemTime,
    ) -> Result<Decision, StoreError> {
        let window_secs = window_secs.max(1);
        let now_secs = epoch_secs(now);
        let index = now_secs / window_secs;
        let key = format!("{key_base}:{index}");

        // Increment first, compare after: a rejected request still consumes
        // one slot. TTL covers two windows so a counter never outlives the
        // window after its own.
        let count = self
            .store
            .incr(&key, Duration::from_secs(window_secs * 2))
            .await?;

        if count > u64::from(limit) {
            Ok(Decision::Rejected {
                retry_after: (index + 1) * window_secs,
            })
        } else {
            Ok(Decision::Allowed {
                remaining: Some(limit - count as u32),
            })
        }
    }

    async fn sliding_window(
        &self,
        identity: &str,
        limit: u32,
        window_secs: u64,
        now: SystemTime,
    ) -> Result<Decision, StoreError> {
        let window_secs = window_secs.max(1);
        let key = format!("rl:sw:{identity}");
        let now_f = epoch_f64(now);
        let window_f = window_secs as f64;

        self.store
            .zremrangebyscore(&key, 0.0, now_f - window_f)
            .await?;
        let count = self.store.zcard(&key).await?;

        if count >= u64::from(limit) {
            // Without a range-read primitive the exact instant the oldest
            // timestamp ages out is unknown; now + window is a safe bound.
            return Ok(Decision::Rejected {
                retry_after: epoch_secs(now) + window_secs,
            });
        }

        let member = format!(
            "{:.6}-{}",
            now_f,
            self.seq.fetch_add(1, Ordering::Relaxed)
        );
        self.store
            .zadd(&key, &member, now_f, Duration::from_secs(window_secs * 2))
            .await?;

        Ok(Decision::Allowed {
            remaining: Some(limit - count as u32 - 1),
        })
    }

    fn apply_policy(
        &self,
        identity: &str,
        allowance: TierLimit,
        now: SystemTime,
        err: &StoreError,
    ) -> Decision {
        self.stats.record_error("limiter");
        crate::metrics::record_store_error("limiter_check");
        crate::metrics::record_limit_fallback(&self.policy.to_string());
        warn!(
            identity,
            policy = %self.policy,
            error = %err,
            "counter store unreachable, applying failure policy"
        );

        match self.policy {
            FailurePolicy::Open => Decision::Allowed { remaining: None },
            FailurePolicy::Closed => Decision::Rejected {
                retry_after: epoch_secs(now) + allowance.window_secs.max(1),
            },
        }
    }
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn epoch_f64(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
