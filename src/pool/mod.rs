// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Provider pool: health tracking, best-provider selection, failover.
//!
//! Each provider starts Healthy (optimistic) and moves to Unhealthy after
//! a configured run of consecutive failures — operational or probe, both
//! feed the same counter. One successful probe brings it back. Selection
//! picks the healthy provider with the lowest rolling latency estimate;
//! [`execute`](ProviderPool::execute) retries down the ranking on failure.
//!
//! All per-provider state lives under one pool-wide `RwLock`, the same
//! lock `select` reads, so a provider is never picked mid-transition. No
//! I/O happens while the lock is held.
//!
//! Pool state is process-local. Instances of the engine may briefly
//! disagree about which providers are healthy; the failover loop absorbs
//! a stale "healthy" selection by moving on to the next provider.

pub mod provider;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::stats::StatsRecorder;
pub use provider::{OriginRequest, OriginResponse, Provider, ProviderError, ProviderRecord};

/// One failed attempt inside an exhausted failover loop.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub provider: String,
    pub reason: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    /// No healthy provider matched the selection criteria. Terminal for
    /// the current request.
    #[error("no provider available")]
    NoProviderAvailable,

    /// Every attempted provider failed; one entry per attempt.
    #[error("operation failed after trying {} provider(s)", .attempts.len())]
    AllAttemptsFailed { attempts: Vec<AttemptFailure> },

    /// Invalidation reached no provider at all.
    #[error("invalidation failed on all {} healthy provider(s)", .failures.len())]
    InvalidationFailed { failures: Vec<AttemptFailure> },
}

/// Outcome of a best-effort invalidation broadcast. Partial failure is a
/// warning, not an error: the broadcast "succeeded" if at least one
/// provider took it.
#[derive(Debug, Clone)]
pub struct InvalidationReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<AttemptFailure>,
}

impl InvalidationReport {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Optional filters for [`ProviderPool::select`].
#[derive(Debug, Clone, Default)]
pub struct SelectCriteria {
    pub region: Option<String>,
}

impl SelectCriteria {
    #[must_use]
    pub fn region(region: impl Into<String>) -> Self {
        Self { region: Some(region.into()) }
    }
}

struct ProviderSlot {
    provider: Arc<dyn Provider>,
    healthy: bool,
    last_check: Option<SystemTime>,
    /// EWMA over successful-operation latency; `None` until first sample.
    latency_ms: Option<f64>,
    consecutive_errors: u32,
}

pub struct ProviderPool {
    slots: RwLock<Vec<ProviderSlot>>,
    config: PoolConfig,
    stats: Arc<StatsRecorder>,
    shutdown_tx: watch::Sender<bool>,
}

impl ProviderPool {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        config: PoolConfig,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| {
                crate::metrics::set_provider_healthy(provider.name(), true);
                ProviderSlot {
                    provider,
                    healthy: true,
                    last_check: None,
                    latency_ms: None,
                    consecutive_errors: 0,
                }
            })
            .collect();

        let (shutdown_tx, _) = watch::channel(false);
        Self {
            slots: RwLock::new(slots),
            config,
            stats,
            shutdown_tx,
        }
    }

    /// Pick the healthy provider with the lowest latency estimate,
    /// optionally filtered by region. Providers without a latency sample
    /// yet rank first so they get measured.
    pub fn select(&self, criteria: Option<&SelectCriteria>) -> Result<Arc<dyn Provider>, PoolError> {
        self.select_excluding(criteria, &[])
            .map(|(_, provider)| provider)
            .ok_or(PoolError::NoProviderAvailable)
    }

    fn select_excluding(
        &self,
        criteria: Option<&SelectCriteria>,
        exclude: &[usize],
    ) -> Option<(usize, Arc<dyn Provider>)> {
        let slots = self.slots.read();
        slots
            .iter()
            .enumerate()
            .filter(|(idx, slot)| {
                slot.healthy
                    && !exclude.contains(idx)
                    && criteria
                        .and_then(|c| c.region.as_deref())
                        .is_none_or(|region| slot.provider.region() == region)
            })
            .min_by(|(_, a), (_, b)| {
                a.latency_ms
                    .unwrap_or(0.0)
                    .total_cmp(&b.latency_ms.unwrap_or(0.0))
            })
            .map(|(idx, slot)| (idx, Arc::clone(&slot.provider)))
    }

    /// Run `request` against the best provider, failing over down the
    /// ranking on error, up to the configured attempt budget.
    pub async fn execute(&self, request: &OriginRequest) -> Result<OriginResponse, PoolError> {
        self.execute_with(request, None).await
    }

    pub async fn execute_with(
        &self,
        request: &OriginRequest,
        criteria: Option<&SelectCriteria>,
    ) -> Result<OriginResponse, PoolError> {
        let mut tried: Vec<usize> = Vec::new();
        let mut failures: Vec<AttemptFailure> = Vec::new();

        while tried.len() < self.config.max_attempts {
            let Some((idx, provider)) = self.select_excluding(criteria, &tried) else {
                break;
            };
            tried.push(idx);

            let start = Instant::now();
            match provider.execute(request).await {
                Ok(response) => {
                    self.record_success(idx, start.elapsed());
                    self.stats.record_hit("pool");
                    crate::metrics::record_operation("pool", "execute", "success");
                    return Ok(response);
                }
                Err(err) => {
                    self.record_failure(idx);
                    crate::metrics::record_failover(provider.name());
                    debug!(
                        provider = provider.name(),
                        path = %request.path,
                        error = %err,
                        "provider attempt failed, trying next"
                    );
                    failures.push(AttemptFailure {
                        provider: provider.name().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.stats.record_error("pool");
        crate::metrics::record_operation("pool", "execute", "failure");
        if failures.is_empty() {
            Err(PoolError::NoProviderAvailable)
        } else {
            warn!(
                attempts = failures.len(),
                path = %request.path,
                "all provider attempts exhausted"
            );
            Err(PoolError::AllAttemptsFailed { attempts: failures })
        }
    }

    /// Broadcast an invalidation to every currently-healthy provider
    /// concurrently. Partial failures are collected into the report
    /// rather than aborting the broadcast.
    pub async fn invalidate(&self, paths: &[String]) -> Result<InvalidationReport, PoolError> {
        let healthy: Vec<(usize, Arc<dyn Provider>)> = {
            let slots = self.slots.read();
            slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.healthy)
                .map(|(idx, slot)| (idx, Arc::clone(&slot.provider)))
                .collect()
        };

        if healthy.is_empty() {
            return Err(PoolError::NoProviderAvailable);
        }

        let mut tasks = JoinSet::new();
        for (idx, provider) in healthy {
            let paths = paths.to_vec();
            tasks.spawn(async move {
                let name = provider.name().to_string();
                let result = provider.invalidate(&paths).await;
                (idx, name, result)
            });
        }

        let mut report = InvalidationReport { succeeded: Vec::new(), failed: Vec::new() };
        while let Some(joined) = tasks.join_next().await {
            let Ok((idx, name, result)) = joined else {
                continue;
            };
            match result {
                Ok(()) => {
                    crate::metrics::record_invalidation(&name, "success");
                    report.succeeded.push(name);
                }
                Err(err) => {
                    self.record_failure(idx);
                    crate::metrics::record_invalidation(&name, "failure");
                    report.failed.push(AttemptFailure { provider: name, reason: err.to_string() });
                }
            }
        }

        if report.succeeded.is_empty() {
            self.stats.record_error("pool.invalidate");
            return Err(PoolError::InvalidationFailed { failures: report.failed });
        }
        if report.is_partial() {
            warn!(
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "invalidation broadcast partially failed"
            );
        }
        Ok(report)
    }

    /// Spawn one background probe task per provider. Tasks run until
    /// [`shutdown`](Self::shutdown).
    pub fn spawn_probes(self: Arc<Self>) {
        let count = self.slots.read().len();
        let interval = Duration::from_secs(self.config.probe_interval_secs.max(1));

        for idx in 0..count {
            let pool = Arc::clone(&self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            pool.probe_one(idx).await;
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        info!(providers = count, interval_secs = interval.as_secs(), "health probes started");
    }

    /// Stop all probe tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Probe one provider and fold the outcome into its health state.
    /// Public mainly for hosts that want probe-on-demand.
    pub async fn probe_one(&self, idx: usize) {
        let provider = {
            let slots = self.slots.read();
            let Some(slot) = slots.get(idx) else { return };
            Arc::clone(&slot.provider)
        };

        // Probe I/O runs outside the pool lock.
        let result = provider.health_probe().await;
        let now = SystemTime::now();

        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(idx) else { return };
        slot.last_check = Some(now);
        match result {
            Ok(()) => {
                crate::metrics::record_probe(provider.name(), "success");
                slot.consecutive_errors = 0;
                if !slot.healthy {
                    info!(provider = provider.name(), "provider recovered");
                    slot.healthy = true;
                    crate::metrics::set_provider_healthy(provider.name(), true);
                }
            }
            Err(err) => {
                crate::metrics::record_probe(provider.name(), "failure");
                slot.consecutive_errors += 1;
                debug!(
                    provider = provider.name(),
                    consecutive = slot.consecutive_errors,
                    error = %err,
                    "health probe failed"
                );
                if slot.healthy && slot.consecutive_errors >= self.config.failure_threshold {
                    warn!(provider = provider.name(), "provider marked unhealthy");
                    slot.healthy = false;
                    crate::metrics::set_provider_healthy(provider.name(), false);
                }
            }
        }
    }

    /// Snapshot of every provider's state, for health reporting.
    #[must_use]
    pub fn records(&self) -> Vec<ProviderRecord> {
        let slots = self.slots.read();
        slots
            .iter()
            .map(|slot| ProviderRecord {
                name: slot.provider.name().to_string(),
                region: slot.provider.region().to_string(),
                healthy: slot.healthy,
                last_check_epoch_ms: slot.last_check.map(|t| {
                    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
                }),
                latency_ms: slot.latency_ms,
                consecutive_errors: slot.consecutive_errors,
            })
            .collect()
    }

    /// Number of healthy providers right now.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.slots.read().iter().filter(|s| s.healthy).count()
    }

    fn record_success(&self, idx: usize, latency: Duration) {
        let sample_ms = latency.as_secs_f64() * 1000.0;
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(idx) else { return };
        slot.consecutive_errors = 0;
        // Health is only restored by a probe, not by an in-flight success
        // that raced a transition.
        slot.latency_ms = Some(match slot.latency_ms {
            Some(current) => {
                self.config.ewma_alpha * sample_ms + (1.0 - self.config.ewma_alpha) * current
            }
            None => sample_ms,
        });
        crate::metrics::record_provider_latency(slot.provider.name(), latency);
    }

    fn record_failure(&self, idx: usize) {
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(idx) else { return };
        slot.consecutive_errors += 1;
        if slot.healthy && slot.consecutive_errors >= self.config.failure_threshold {
            warn!(
                provider = slot.provider.name(),
                consecutive = slot.consecutive_errors,
                "provider marked unhealthy"
            );
            slot.healthy = false;
            crate::metrics::set_provider_healthy(slot.provider.name(), false);
        }
    }

    /// Force a latency estimate, bypassing the EWMA. Test hook.
    #[cfg(test)]
    fn set_latency(&self, idx: usize, latency_ms: f64) {
        self.slots.write()[idx].latency_ms = Some(latency_ms);
    }
}
