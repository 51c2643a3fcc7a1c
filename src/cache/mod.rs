// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-level read-through/write-through cache.
//!
//! Reads check the local tier first, then the shared counter store; a
//! shared hit is promoted into the local tier with its TTL capped at
//! `min(local_ttl, remaining_shared_ttl)`, so a local copy never outlives
//! the shared entry it came from. Writes land locally immediately and in
//! the shared tier best-effort — a shared write failure is logged and
//! counted, never propagated, because this process already has the value.
//!
//! There is no cross-process invalidation of local tiers: staleness is
//! bounded by the local TTL. Callers needing strong consistency read the
//! shared tier via `delete` + refetch, or bypass this cache.
//!
//! Values are serialized with serde_json; both tiers store opaque bytes.

pub mod local;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::stats::StatsRecorder;
use crate::store::{CounterStore, StoreError};
use local::LocalCache;

/// Namespace for cache keys in the shared store, keeping them clear of the
/// limiter's `rl:` keys.
const SHARED_PREFIX: &str = "cache:";

pub struct TieredCache {
    local: LocalCache,
    shared: Arc<dyn CounterStore>,
    local_ttl: Duration,
    default_shared_ttl: Duration,
    stats: Arc<StatsRecorder>,
}

impl TieredCache {
    pub fn new(
        shared: Arc<dyn CounterStore>,
        config: &CacheConfig,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            local: LocalCache::new(config.local_max_entries),
            shared,
            local_ttl: Duration::from_secs(config.local_ttl_secs),
            default_shared_ttl: Duration::from_secs(config.shared_ttl_secs),
            stats,
        }
    }

    /// Look up `key`, local tier first.
    ///
    /// Shared-tier errors (including timeouts) are treated as a miss so
    /// the caller falls through to its fetch path.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(bytes) = self.local.get(key) {
            self.stats.record_hit("cache.local");
            crate::metrics::record_cache_lookup("local", "hit");
            match serde_json::from_slice(&bytes) {
                Ok(value) => return Some(value),
                Err(err) => {
                    warn!(key, error = %err, "undecodable local cache entry, dropping");
                    self.local.delete(key);
                }
            }
        }
        crate::metrics::record_cache_lookup("local", "miss");

        match self.shared.get(&shared_key(key)).await {
            Ok(Some(stored)) => {
                self.stats.record_hit("cache.shared");
                crate::metrics::record_cache_lookup("shared", "hit");
                // Cap the promotion so the local copy expires no later
                // than the shared entry.
                let ttl = match stored.remaining_ttl {
                    Some(remaining) => self.local_ttl.min(remaining),
                    None => self.local_ttl,
                };
                self.local.insert(key, stored.data.clone(), ttl);
                match serde_json::from_slice(&stored.data) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(key, error = %err, "undecodable shared cache entry");
                        self.stats.record_error("cache.shared");
                        None
                    }
                }
            }
            Ok(None) => {
                self.stats.record_miss("cache.shared");
                crate::metrics::record_cache_lookup("shared", "miss");
                None
            }
            Err(err) => {
                self.stats.record_error("cache.shared");
                crate::metrics::record_store_error("cache_get");
                warn!(key, error = %err, "shared cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write through both tiers. The shared write is best-effort: on
    /// failure the value still lives in the local tier for this process.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key, error = %err, "unserializable cache value, skipping");
                self.stats.record_error("cache.local");
                return;
            }
        };

        let shared_ttl = ttl.unwrap_or(self.default_shared_ttl);
        self.local
            .insert(key, bytes.clone(), self.local_ttl.min(shared_ttl));

        if let Err(err) = self.shared.set(&shared_key(key), &bytes, shared_ttl).await {
            self.stats.record_error("cache.shared");
            crate::metrics::record_store_error("cache_set");
            warn!(key, error = %err, "shared cache write failed, local tier retains value");
        }
    }

    /// Remove `key` from both tiers. The local removal always happens;
    /// a shared-tier failure is returned so the caller knows other
    /// processes may still see the entry.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.local.delete(key);
        self.shared.delete(&shared_key(key)).await
    }

    /// Remove every key starting with `prefix` from both tiers. The shared
    /// store has no prefix-delete primitive, so matching keys are
    /// enumerated first. Returns how many shared keys were removed.
    pub async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let local_removed = self.local.delete_prefix(prefix);

        let pattern = format!("{}*", shared_key(prefix));
        let keys = self.shared.scan_keys(&pattern).await?;
        let shared_removed = if keys.is_empty() {
            0
        } else {
            self.shared.delete_many(&keys).await?
        };

        debug!(prefix, local_removed, shared_removed, "prefix invalidation");
        Ok(shared_removed)
    }

    /// Read-through helper: return the cached value or run `fetch`, write
    /// the result back through both tiers, and return it. Fetch errors
    /// pass through untouched; nothing is cached for them.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = fetch().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// (entries, capacity-free view) for health reporting.
    #[must_use]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

fn shared_key(key: &str) -> String {
    format!("{SHARED_PREFIX}{key}")
}
