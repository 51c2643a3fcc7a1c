//! Public types for the admission engine coordinator.

use serde::Serialize;
use thiserror::Error;

use crate::pool::{AttemptFailure, PoolError, ProviderRecord};

/// Engine lifecycle state.
///
/// Use [`super::AdmissionEngine::state()`] to read it or
/// [`super::AdmissionEngine::state_receiver()`] to watch transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, counter store not yet attached.
    Created,
    /// Connecting to the counter store.
    Connecting,
    /// Connected; probes not yet running.
    Ready,
    /// Probes running, serving traffic.
    Running,
    /// Graceful shutdown in progress.
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Errors surfaced to the calling layer.
///
/// Infrastructure noise (shared-tier write failures, single provider
/// failures with a successful failover, partial invalidations) is absorbed
/// and logged; what reaches here is either a policy outcome or terminal
/// for the request. The engine never produces an HTTP status code — the
/// host maps these.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The identity is over its allowance. Never retried by this layer.
    #[error("rate limit exceeded, retry after {retry_after}")]
    RateLimitExceeded {
        /// Epoch seconds after which a retry can succeed.
        retry_after: u64,
    },

    /// No healthy provider matched; terminal for this request.
    #[error("no provider available")]
    NoProviderAvailable,

    /// Every provider attempt failed; one entry per attempt.
    #[error("provider operation failed after {} attempt(s)", .attempts.len())]
    ProviderOperationFailed { attempts: Vec<AttemptFailure> },
}

impl From<PoolError> for AdmissionError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NoProviderAvailable => Self::NoProviderAvailable,
            PoolError::AllAttemptsFailed { attempts } => {
                Self::ProviderOperationFailed { attempts }
            }
            PoolError::InvalidationFailed { failures } => {
                Self::ProviderOperationFailed { attempts: failures }
            }
        }
    }
}

/// Aggregated health view for host `/health` and `/ready` endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Engine state as a string (`Running`, ...).
    pub state: String,
    /// Ready to serve traffic.
    pub ready: bool,
    /// Overall health: running, store reachable (when configured for
    /// one), at least one healthy provider.
    pub healthy: bool,
    /// Live counter-store probe outcome.
    pub store_connected: bool,
    pub store_latency_ms: Option<u64>,
    pub providers: Vec<ProviderRecord>,
    pub healthy_providers: usize,
    pub cache_local_entries: usize,
}
