// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff.
//!
//! Counter-store traffic is the only network I/O in the engine, and it is
//! retried at two points with different budgets: connecting at startup
//! (fail fast so a bad URL surfaces immediately) and individual operations
//! (a couple of quick attempts, then hand the error to the caller's
//! fail-open/fail-closed policy).
//!
//! # Example
//!
//! ```
//! use admission_engine::resilience::retry::RetryConfig;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! let op = RetryConfig::operation();
//! assert_eq!(op.max_retries, Some(2));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff schedule for [`retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::operation()
    }
}

impl RetryConfig {
    /// Initial connection to the counter store. A handful of attempts over
    /// a few seconds so configuration errors surface at startup rather
    /// than hanging the host.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Individual store operation. Two quick attempts; a request is waiting
    /// on this, so the limiter/cache fallback path takes over after that.
    #[must_use]
    pub fn operation() -> Self {
        Self {
            max_retries: Some(2),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
        }
    }

    /// Minimal delays for tests.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        }
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0usize;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(op = operation_name, attempts, "operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if let Some(max) = config.max_retries {
                    if attempts > max {
                        return Err(err);
                    }
                }
                warn!(
                    op = operation_name,
                    attempt = attempts,
                    error = %err,
                    next_delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
                );
                sleep(delay).await;
                delay = delay.mul_f64(config.factor).min(config.max_delay);
            }
        }
    }
}
