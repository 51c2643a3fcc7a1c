//! The capability set a backend provider must expose.
//!
//! Concrete providers (distinct CDN vendors, origin shields, mirrors) are
//! registered at startup from configuration and are otherwise opaque to
//! the pool: it only ever calls the three trait methods.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single operation routed to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRequest {
    pub path: String,
}

impl OriginRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginResponse {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("operation failed: {0}")]
    Failed(String),
}

/// Interchangeable backend provider.
///
/// Implementations must be cheap to clone behind an `Arc`; the pool calls
/// them concurrently from request tasks and the background prober.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn region(&self) -> &str;

    async fn execute(&self, request: &OriginRequest) -> Result<OriginResponse, ProviderError>;

    /// Liveness probe, run on a fixed interval independent of traffic.
    async fn health_probe(&self) -> Result<(), ProviderError>;

    /// Purge the given paths from this provider's edge.
    async fn invalidate(&self, paths: &[String]) -> Result<(), ProviderError>;
}

/// Externally visible snapshot of one provider's pool state.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRecord {
    pub name: String,
    pub region: String,
    pub healthy: bool,
    /// Epoch milliseconds of the last health probe, `None` before the
    /// first one.
    pub last_check_epoch_ms: Option<u64>,
    /// Rolling EWMA of successful-operation latency. Kept across
    /// unhealthy transitions so a recovered provider competes with its
    /// last known latency rather than starting from scratch.
    pub latency_ms: Option<f64>,
    pub consecutive_errors: u32,
}
