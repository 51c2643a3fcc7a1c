// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-scope hit/miss/error counters.
//!
//! Purely additive; counters only move forward until an explicit
//! [`reset`](StatsRecorder::reset). Scopes are free-form dotted strings
//! ("cache.local", "limiter", "pool") so the host can carve up the
//! snapshot however it reports it.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Default)]
struct ScopeCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time view of one scope's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// `hits / (hits + misses)`, 0.0 when no lookups were recorded.
    pub hit_ratio: f64,
}

/// Thread-safe recorder shared across all engine components.
#[derive(Default)]
pub struct StatsRecorder {
    scopes: DashMap<String, ScopeCounters>,
}

impl StatsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, scope: &str) {
        self.counters(scope).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, scope: &str) {
        self.counters(scope).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, scope: &str) {
        self.counters(scope).errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot one scope. A scope that was never recorded reads as all-zero.
    #[must_use]
    pub fn snapshot(&self, scope: &str) -> ScopeSnapshot {
        match self.scopes.get(scope) {
            Some(counters) => Self::to_snapshot(&counters),
            None => ScopeSnapshot {
                hits: 0,
                misses: 0,
                errors: 0,
                hit_ratio: 0.0,
            },
        }
    }

    /// Snapshot every scope that has recorded at least one event.
    #[must_use]
    pub fn snapshot_all(&self) -> std::collections::HashMap<String, ScopeSnapshot> {
        self.scopes
            .iter()
            .map(|entry| (entry.key().clone(), Self::to_snapshot(entry.value())))
            .collect()
    }

    /// Zero one scope's counters.
    pub fn reset(&self, scope: &str) {
        if let Some(counters) = self.scopes.get(scope) {
            counters.hits.store(0, Ordering::Relaxed);
            counters.misses.store(0, Ordering::Relaxed);
            counters.errors.store(0, Ordering::Relaxed);
        }
    }

    fn counters(&self, scope: &str) -> dashmap::mapref::one::Ref<'_, String, ScopeCounters> {
        if let Some(counters) = self.scopes.get(scope) {
            return counters;
        }
        self.scopes
            .entry(scope.to_string())
            .or_default()
            .downgrade()
    }

    fn to_snapshot(counters: &ScopeCounters) -> ScopeSnapshot {
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        let errors = counters.errors.load(Ordering::Relaxed);
        let lookups = hits + misses;
        ScopeSnapshot {
            hits,
            misses,
            errors,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scope_is_zero() {
        let stats = StatsRecorder::new();
        let snap = stats.snapshot("nothing");
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.misses, 0);
        assert_eq!(snap.errors, 0);
        assert_eq!(snap.hit_ratio, 0.0);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = StatsRecorder::new();
        for _ in 0..3 {
            stats.record_hit("cache.local");
        }
        stats.record_miss("cache.local");
        stats.record_error("cache.local");

        let snap = stats.snapshot("cache.local");
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.errors, 1);
        assert!((snap.hit_ratio - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scopes_are_independent() {
        let stats = StatsRecorder::new();
        stats.record_hit("a");
        stats.record_miss("b");

        assert_eq!(stats.snapshot("a").hits, 1);
        assert_eq!(stats.snapshot("a").misses, 0);
        assert_eq!(stats.snapshot("b").misses, 1);
    }

    #[test]
    fn test_reset_zeroes_single_scope() {
        let stats = StatsRecorder::new();
        stats.record_hit("a");
        stats.record_hit("b");

        stats.reset("a");

        assert_eq!(stats.snapshot("a").hits, 0);
        assert_eq!(stats.snapshot("b").hits, 1);
    }

    #[test]
    fn test_snapshot_all_lists_touched_scopes() {
        let stats = StatsRecorder::new();
        stats.record_hit("limiter");
        stats.record_error("pool");

        let all = stats.snapshot_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all["limiter"].hits, 1);
        assert_eq!(all["pool"].errors, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        use std::sync::Arc;

        let stats = Arc::new(StatsRecorder::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_hit("shared");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot("shared").hits, 8000);
    }
}
