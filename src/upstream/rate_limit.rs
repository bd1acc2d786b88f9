//! Adaptive rate limiting shared by the HTTP upstreams.
//!
//! Wraps a governor limiter whose quota drops when the recent upstream
//! error rate goes over a threshold and climbs back toward the base quota
//! once errors subside.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

#[derive(Debug)]
struct QuotaState {
    current_quota: u32,
    /// Recent request outcomes, `true` on success
    window: VecDeque<bool>,
    last_adjustment: Instant,
}

/// Governor limiter with an error-rate driven quota.
pub struct AdaptiveRateLimiter {
    limiter: RwLock<Arc<DefaultDirectRateLimiter>>,
    state: Mutex<QuotaState>,
    base_quota: u32,
    min_quota: u32,
    window_size: usize,
    error_threshold: f64,
    adjustment_interval: Duration,
}

fn direct_limiter(requests_per_second: u32) -> Arc<DefaultDirectRateLimiter> {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}

impl AdaptiveRateLimiter {
    pub fn new(base_requests_per_second: u32, window_size: usize, error_threshold: f64) -> Self {
        let base_quota = base_requests_per_second.max(1);
        Self {
            limiter: RwLock::new(direct_limiter(base_quota)),
            state: Mutex::new(QuotaState {
                current_quota: base_quota,
                window: VecDeque::with_capacity(window_size),
                last_adjustment: Instant::now(),
            }),
            base_quota,
            // Never below a quarter of the base rate
            min_quota: (base_quota / 4).max(1),
            window_size,
            error_threshold: error_threshold.clamp(0.0, 1.0),
            adjustment_interval: Duration::from_secs(30),
        }
    }

    /// Minimum time between two quota changes.
    pub fn with_adjustment_interval(mut self, interval: Duration) -> Self {
        self.adjustment_interval = interval;
        self
    }

    /// Wait for a permit under the current quota.
    pub async fn acquire(&self) {
        let limiter = self.limiter.read().await.clone();
        limiter.until_ready().await;
    }

    /// Record the outcome of an upstream request.
    #[instrument(skip(self))]
    pub async fn record(&self, success: bool) {
        let mut state = self.state.lock().await;
        state.window.push_back(success);
        while state.window.len() > self.window_size {
            state.window.pop_front();
        }

        let enough_samples = state.window.len() >= self.window_size / 2;
        if !enough_samples || state.last_adjustment.elapsed() < self.adjustment_interval {
            return;
        }

        let error_rate = Self::error_rate(&state.window);
        let old_quota = state.current_quota;

        if error_rate > self.error_threshold {
            let reduction_factor = 1.0 - (error_rate - self.error_threshold) * 0.5;
            let reduced = (f64::from(old_quota) * reduction_factor) as u32;
            state.current_quota = reduced.max(self.min_quota);
            warn!(
                "High upstream error rate {:.2}%, reducing quota from {} to {} req/s",
                error_rate * 100.0,
                old_quota,
                state.current_quota
            );
        } else if error_rate < self.error_threshold * 0.5 && old_quota < self.base_quota {
            let increase_factor = 1.0 + (self.error_threshold * 0.5 - error_rate) * 0.2;
            // Always step up by at least one so small quotas recover
            let increased = ((f64::from(old_quota) * increase_factor) as u32).max(old_quota + 1);
            state.current_quota = increased.min(self.base_quota);
            debug!("Upstream error rate {:.2}%, raising quota to {} req/s", error_rate * 100.0, state.current_quota);
        }

        if state.current_quota != old_quota {
            *self.limiter.write().await = direct_limiter(state.current_quota);
            state.last_adjustment = Instant::now();
        }
    }

    fn error_rate(window: &VecDeque<bool>) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        let errors = window.iter().filter(|&&ok| !ok).count();
        errors as f64 / window.len() as f64
    }

    pub async fn current_quota(&self) -> u32 {
        self.state.lock().await.current_quota
    }

    pub async fn stats(&self) -> RateLimitStats {
        let state = self.state.lock().await;
        RateLimitStats {
            base_quota: self.base_quota,
            current_quota: state.current_quota,
            error_rate: Self::error_rate(&state.window),
            sampled: state.window.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub base_quota: u32,
    pub current_quota: u32,
    pub error_rate: f64,
    pub sampled: usize,
}
