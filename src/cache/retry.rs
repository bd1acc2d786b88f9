//! Bounded retry with exponential backoff for upstream fetches.

use crate::cache::error::CacheError;
use crate::types::Domain;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, warn};

/// Retry settings shared by every domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff delays between attempts: initial, 2x initial, 4x initial...
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) yields 2, 4, 8...; the factor scales that to the initial delay
        ExponentialBackoff::from_millis(2)
            .factor(self.initial_backoff_ms / 2)
            .max_delay(Duration::from_millis(self.max_backoff_ms))
            .take(self.max_attempts.saturating_sub(1))
    }

    /// Run `fetch` with a per-attempt timeout, retrying transient failures.
    ///
    /// Returns the final outcome and the number of attempts made.
    pub async fn run<T, F, Fut>(&self, domain: Domain, timeout: Duration, mut fetch: F) -> (Result<T, CacheError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let attempts = AtomicU32::new(0);
        let timeout_ms = timeout.as_millis() as u64;

        let result = RetryIf::spawn(
            self.strategy(),
            || {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let fut = fetch();
                async move {
                    if attempt > 1 {
                        debug!("Retrying {} upstream fetch, attempt {}", domain, attempt);
                    }
                    match tokio::time::timeout(timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(CacheError::UpstreamTimeout { domain, timeout_ms }),
                    }
                }
            },
            |err: &CacheError| {
                let retry = err.is_retryable();
                if retry {
                    warn!("Transient {} upstream failure: {}", domain, err);
                }
                retry
            },
        )
        .await;

        (result, attempts.load(Ordering::Relaxed))
    }
}
