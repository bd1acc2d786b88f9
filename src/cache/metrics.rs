//! Usage and cost metrics for the cache core.
//!
//! Counters are kept per domain behind a single `RwLock`. Each domain's
//! orchestrator, coalescer and scheduler write only that domain's counters;
//! increments are independent and need no cross-counter atomicity.

use crate::cache::coalescer::FetchOrigin;
use crate::cache::types::Scope;
use crate::types::Domain;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Upstream latency samples kept per domain.
const MAX_LATENCY_SAMPLES: usize = 100;

/// Raw counters for one domain.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DomainCounters {
    pub hits: u64,
    pub misses: u64,
    /// Request-path upstream calls (one per coalesced fetch)
    pub upstream_calls: u64,
    pub upstream_failures: u64,
    pub estimated_cost: f64,
    /// Extra attempts made by the retry policy
    pub retries: u64,
    /// Scheduler-path upstream calls
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub entries_written: u64,
    /// Upstream fetches currently outstanding
    pub in_flight: u64,
}

/// Internal metrics storage.
#[derive(Debug)]
struct InternalMetrics {
    counters: HashMap<Domain, DomainCounters>,
    latencies: HashMap<Domain, VecDeque<f64>>,
    /// Bumped on every reset of a domain
    epochs: HashMap<Domain, u64>,
    since: DateTime<Utc>,
}

impl Default for InternalMetrics {
    fn default() -> Self {
        Self {
            counters: HashMap::new(),
            latencies: HashMap::new(),
            epochs: HashMap::new(),
            since: Utc::now(),
        }
    }
}

/// Handle for one outstanding upstream fetch, returned by
/// [`MetricsRecorder::fetch_started`].
#[derive(Debug, Clone, Copy)]
pub struct FetchTicket {
    domain: Domain,
    origin: FetchOrigin,
    epoch: u64,
}

/// Shared metrics recorder.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    metrics: Arc<RwLock<InternalMetrics>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_hit(&self, domain: Domain) {
        let mut metrics = self.metrics.write().await;
        metrics.counters.entry(domain).or_default().hits += 1;
    }

    /// Miss served by joining a fetch another caller already started.
    pub async fn record_miss(&self, domain: Domain) {
        let mut metrics = self.metrics.write().await;
        metrics.counters.entry(domain).or_default().misses += 1;
    }

    /// Count the start of an upstream fetch. A request-path fetch counts its
    /// leader's miss and the upstream call under the same lock, so a reset
    /// can never separate the two.
    pub async fn fetch_started(&self, domain: Domain, origin: FetchOrigin) -> FetchTicket {
        let mut metrics = self.metrics.write().await;
        let epoch = metrics.epochs.get(&domain).copied().unwrap_or(0);
        let counters = metrics.counters.entry(domain).or_default();
        counters.in_flight += 1;
        match origin {
            FetchOrigin::Request => {
                counters.misses += 1;
                counters.upstream_calls += 1;
            }
            FetchOrigin::Refresh => counters.refreshes += 1,
        }

        FetchTicket { domain, origin, epoch }
    }

    /// Record how a fetch ended. Outcomes of fetches started before the last
    /// reset only release the in-flight gauge.
    #[instrument(skip(self), fields(domain = %ticket.domain))]
    pub async fn fetch_finished(
        &self,
        ticket: FetchTicket,
        success: bool,
        cost_estimate: f64,
        latency: Duration,
        retries: u64,
    ) {
        let mut metrics = self.metrics.write().await;
        let current = metrics.epochs.get(&ticket.domain).copied().unwrap_or(0) == ticket.epoch;
        let counters = metrics.counters.entry(ticket.domain).or_default();
        counters.in_flight = counters.in_flight.saturating_sub(1);
        if !current {
            debug!("Dropping outcome of a {} fetch started before the last reset", ticket.domain);
            return;
        }

        counters.retries += retries;
        if success {
            counters.estimated_cost += cost_estimate;
        } else {
            match ticket.origin {
                FetchOrigin::Request => counters.upstream_failures += 1,
                FetchOrigin::Refresh => counters.refresh_failures += 1,
            }
        }
        Self::push_latency(&mut metrics, ticket.domain, latency);

        debug!("Recorded {:?} fetch for {}: success={}", ticket.origin, ticket.domain, success);
    }

    pub async fn record_write(&self, domain: Domain) {
        let mut metrics = self.metrics.write().await;
        metrics.counters.entry(domain).or_default().entries_written += 1;
    }

    fn push_latency(metrics: &mut InternalMetrics, domain: Domain, latency: Duration) {
        let samples = metrics.latencies.entry(domain).or_default();
        samples.push_back(latency.as_secs_f64() * 1000.0);
        while samples.len() > MAX_LATENCY_SAMPLES {
            samples.pop_front();
        }
    }

    /// Reset counters for one domain or all of them. The in-flight gauge
    /// reflects live fetches and survives a reset.
    #[instrument(skip(self))]
    pub async fn reset(&self, scope: Scope) {
        let mut metrics = self.metrics.write().await;
        for domain in Domain::ALL.into_iter().filter(|d| scope.includes(*d)) {
            let in_flight = metrics.counters.get(&domain).map_or(0, |c| c.in_flight);
            metrics.counters.insert(
                domain,
                DomainCounters {
                    in_flight,
                    ..DomainCounters::default()
                },
            );
            metrics.latencies.remove(&domain);
            *metrics.epochs.entry(domain).or_default() += 1;
        }
        if scope == Scope::All {
            metrics.since = Utc::now();
        }
        info!("Reset usage metrics for {:?}", scope);
    }

    /// Immutable copy of all counters with derived rates.
    pub async fn snapshot(&self) -> UsageMetrics {
        let metrics = self.metrics.read().await;

        let domains = Domain::ALL
            .into_iter()
            .map(|domain| {
                let counters = metrics.counters.get(&domain).cloned().unwrap_or_default();
                let avg_latency = metrics
                    .latencies
                    .get(&domain)
                    .filter(|samples| !samples.is_empty())
                    .map(|samples| samples.iter().sum::<f64>() / samples.len() as f64)
                    .unwrap_or(0.0);
                (domain, DomainUsage::from_counters(counters, avg_latency))
            })
            .collect();

        UsageMetrics {
            domains,
            since: metrics.since,
            captured_at: Utc::now(),
        }
    }
}

/// Latency bucket derived from the average upstream latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl PerformanceStatus {
    pub fn from_latency_ms(avg_latency_ms: f64) -> Self {
        if avg_latency_ms < 1000.0 {
            PerformanceStatus::Excellent
        } else if avg_latency_ms < 3000.0 {
            PerformanceStatus::Good
        } else if avg_latency_ms < 5000.0 {
            PerformanceStatus::Fair
        } else {
            PerformanceStatus::Poor
        }
    }
}

/// Counters for one domain plus derived figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainUsage {
    #[serde(flatten)]
    pub counters: DomainCounters,
    /// Hits over total lookups, 0.0-1.0
    pub hit_rate: f64,
    /// Failed upstream calls over upstream calls, 0.0-1.0
    pub error_rate: f64,
    pub avg_upstream_latency_ms: f64,
    pub performance: PerformanceStatus,
}

impl DomainUsage {
    fn from_counters(counters: DomainCounters, avg_upstream_latency_ms: f64) -> Self {
        let lookups = counters.hits + counters.misses;
        let hit_rate = if lookups > 0 {
            counters.hits as f64 / lookups as f64
        } else {
            0.0
        };

        let calls = counters.upstream_calls + counters.refreshes;
        let failures = counters.upstream_failures + counters.refresh_failures;
        let error_rate = if calls > 0 {
            failures as f64 / calls as f64
        } else {
            0.0
        };

        Self {
            counters,
            hit_rate,
            error_rate,
            avg_upstream_latency_ms,
            performance: PerformanceStatus::from_latency_ms(avg_upstream_latency_ms),
        }
    }

    pub fn lookups(&self) -> u64 {
        self.counters.hits + self.counters.misses
    }
}

/// Snapshot of usage metrics across all domains.
#[derive(Debug, Clone, Serialize)]
pub struct UsageMetrics {
    pub domains: BTreeMap<Domain, DomainUsage>,
    /// Start of the counting window (process start or last full reset)
    pub since: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
}

impl UsageMetrics {
    pub fn domain(&self, domain: Domain) -> &DomainUsage {
        // snapshot() always fills every domain
        &self.domains[&domain]
    }

    pub fn total_cost(&self) -> f64 {
        self.domains.values().map(|u| u.counters.estimated_cost).sum()
    }

    pub fn total_in_flight(&self) -> u64 {
        self.domains.values().map(|u| u.counters.in_flight).sum()
    }

    /// Human-readable tuning hints.
    pub fn suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();

        for (domain, usage) in &self.domains {
            let lookups = usage.lookups();
            if lookups > 10 && usage.hit_rate < 0.3 {
                suggestions.push(format!("Low {} cache hit rate - consider increasing its TTL", domain));
            }
            match usage.performance {
                PerformanceStatus::Poor => {
                    suggestions.push(format!("High {} upstream latency - consider a longer refresh lead", domain))
                }
                PerformanceStatus::Fair => {
                    suggestions.push(format!("Moderate {} upstream latency", domain))
                }
                _ => {}
            }
            if usage.error_rate > 0.10 {
                suggestions.push(format!("High {} upstream error rate - check upstream stability", domain));
            }
        }

        if suggestions.is_empty() {
            suggestions.push("Performance is optimal".to_string());
        }
        suggestions
    }
}
