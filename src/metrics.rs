// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the admission engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host
//! chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `admission_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `component`: limiter, cache, pool, store, engine
//! - `tier`: local, shared (cache metrics)
//! - `outcome`: allowed, rejected, hit, miss, success, failure

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Record a component operation outcome.
pub fn record_operation(component: &str, operation: &str, outcome: &str) {
    counter!(
        "admission_operations_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record operation latency.
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "admission_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// RATE LIMITER
// ═══════════════════════════════════════════════════════════════════════════

/// Record a rate-limit decision for a tier.
pub fn record_limit_decision(tier: &str, outcome: &str) {
    counter!(
        "admission_limit_decisions_total",
        "tier" => tier.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a limiter fallback (store unreachable, policy applied).
pub fn record_limit_fallback(policy: &str) {
    counter!(
        "admission_limit_fallbacks_total",
        "policy" => policy.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// TIERED CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache lookup outcome per tier (`local`/`shared`) .
pub fn record_cache_lookup(tier: &str, outcome: &str) {
    counter!(
        "admission_cache_lookups_total",
        "tier" => tier.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a local-tier eviction.
pub fn record_cache_eviction(count: usize) {
    counter!("admission_cache_evictions_total").increment(count as u64);
}

/// Set current local-tier entry count.
pub fn set_cache_local_entries(count: usize) {
    gauge!("admission_cache_local_entries").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// PROVIDER POOL
// ═══════════════════════════════════════════════════════════════════════════

/// Set provider health (1 = healthy, 0 = unhealthy).
pub fn set_provider_healthy(provider: &str, healthy: bool) {
    gauge!(
        "admission_provider_healthy",
        "provider" => provider.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Record a provider operation latency sample.
pub fn record_provider_latency(provider: &str, duration: Duration) {
    histogram!(
        "admission_provider_seconds",
        "provider" => provider.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a failover (operation retried against another provider).
pub fn record_failover(from: &str) {
    counter!(
        "admission_failovers_total",
        "from" => from.to_string()
    )
    .increment(1);
}

/// Record a health probe outcome.
pub fn record_probe(provider: &str, outcome: &str) {
    counter!(
        "admission_probes_total",
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an invalidation broadcast outcome per provider.
pub fn record_invalidation(provider: &str, outcome: &str) {
    counter!(
        "admission_invalidations_total",
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// COUNTER STORE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a counter-store operation deadline expiry.
pub fn record_store_timeout(operation: &str) {
    counter!(
        "admission_store_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a counter-store error.
pub fn record_store_error(operation: &str) {
    counter!(
        "admission_store_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker call outcome.
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "admission_circuit_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Record an engine state transition.
pub fn record_engine_state(state: &str) {
    counter!(
        "admission_engine_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop.
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.component, self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations.
#[macro_export]
macro_rules! time_operation {
    ($component:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($component, $op)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API compiles and doesn't panic; assertions against
    // recorded values belong to the host's exporter tests.

    #[test]
    fn test_counters() {
        record_operation("cache", "get", "hit");
        record_limit_decision("free", "rejected");
        record_limit_fallback("open");
        record_cache_lookup("local", "hit");
        record_cache_eviction(3);
        record_failover("cdn-a");
        record_probe("cdn-a", "failure");
        record_invalidation("cdn-b", "success");
        record_store_timeout("incr");
        record_store_error("zadd");
        record_circuit_call("counter_store", "rejected");
        record_engine_state("Ready");
    }

    #[test]
    fn test_gauges() {
        set_cache_local_entries(128);
        set_provider_healthy("cdn-a", true);
        set_provider_healthy("cdn-b", false);
    }

    #[test]
    fn test_latency_timer_records_on_drop() {
        {
            let _timer = LatencyTimer::new("cache", "get");
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    #[test]
    fn test_histograms() {
        record_latency("pool", "execute", Duration::from_millis(12));
        record_provider_latency("cdn-a", Duration::from_millis(34));
    }
}
