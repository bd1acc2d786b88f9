//! Upstream health tracking per domain.
//!
//! Tracks consecutive failures and a rolling success rate of completed
//! upstream fetches. State is reported only; it never blocks a fetch.

use crate::types::Domain;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, instrument, warn};

/// Minimum success rate over a full sample before a domain goes offline.
const MIN_SUCCESS_RATE: f64 = 0.3;
/// Success rate required to recover from degraded.
const RECOVERY_SUCCESS_RATE: f64 = 0.7;

/// Health of a domain's upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Online,
    /// Failing but still being called
    Degraded,
    Offline,
}

/// Rolling health of one upstream.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    domain: Domain,
    state: HealthState,
    consecutive_failures: u32,
    recent_outcomes: VecDeque<bool>,
    failure_threshold: u32,
    sample_size: usize,
}

impl HealthTracker {
    pub fn new(domain: Domain, failure_threshold: u32, sample_size: usize) -> Self {
        Self {
            domain,
            state: HealthState::Online,
            consecutive_failures: 0,
            recent_outcomes: VecDeque::with_capacity(sample_size),
            failure_threshold,
            sample_size,
        }
    }

    #[instrument(skip(self), fields(domain = %self.domain))]
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.push_outcome(true);

        if self.state == HealthState::Offline {
            self.state = HealthState::Degraded;
            debug!("{} upstream answered again, moving to degraded", self.domain);
        }
        self.update_state();
    }

    #[instrument(skip(self), fields(domain = %self.domain))]
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.push_outcome(false);
        self.update_state();

        warn!(
            "{} upstream failure: {} consecutive, {:.2}% success rate",
            self.domain,
            self.consecutive_failures,
            self.success_rate() * 100.0
        );
    }

    pub fn record(&mut self, success: bool) {
        if success {
            self.record_success();
        } else {
            self.record_failure();
        }
    }

    fn push_outcome(&mut self, success: bool) {
        self.recent_outcomes.push_back(success);
        while self.recent_outcomes.len() > self.sample_size {
            self.recent_outcomes.pop_front();
        }
    }

    fn update_state(&mut self) {
        match self.state {
            HealthState::Online => {
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = HealthState::Degraded;
                    debug!("{} upstream degraded: {} consecutive failures", self.domain, self.consecutive_failures);
                }
            }
            HealthState::Degraded => {
                let sample_full = self.recent_outcomes.len() >= self.sample_size;
                if self.consecutive_failures >= self.failure_threshold * 2
                    || (sample_full && self.success_rate() < MIN_SUCCESS_RATE)
                {
                    self.state = HealthState::Offline;
                    warn!(
                        "{} upstream offline: {} failures, {:.2}% success rate",
                        self.domain,
                        self.consecutive_failures,
                        self.success_rate() * 100.0
                    );
                } else if self.consecutive_failures == 0 && self.success_rate() > RECOVERY_SUCCESS_RATE {
                    self.state = HealthState::Online;
                    debug!("{} upstream recovered", self.domain);
                }
            }
            HealthState::Offline => {}
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Success rate over the rolling sample; 1.0 before any outcome.
    pub fn success_rate(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.recent_outcomes.iter().filter(|&&ok| ok).count();
        successes as f64 / self.recent_outcomes.len() as f64
    }

    pub fn stats(&self) -> HealthStats {
        HealthStats {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            success_rate: self.success_rate(),
            sampled: self.recent_outcomes.len(),
        }
    }
}

/// Health statistics for external reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStats {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub sampled: usize,
}
