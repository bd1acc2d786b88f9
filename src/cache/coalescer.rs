//! Single-flight request coalescing.
//!
//! At most one upstream fetch runs per key. The first caller for a key
//! becomes the leader: it registers an in-flight entry and spawns the fetch
//! as its own task. Later callers for the same key subscribe to the entry's
//! `watch` channel and receive the same outcome, success or error.
//!
//! The fetch runs detached from the callers, so a caller that gives up does
//! not cancel the fetch for everybody else.

use crate::cache::error::CacheError;
use crate::cache::health::{HealthStats, HealthTracker};
use crate::cache::metrics::{FetchTicket, MetricsRecorder};
use crate::cache::retry::RetryPolicy;
use crate::types::Domain;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

type Outcome<V> = Option<Result<V, CacheError>>;

/// What a fetch outcome says about the upstream's health, if anything.
/// An upstream that answers "no such key" is working.
fn health_signal<V>(result: &Result<V, CacheError>) -> Option<bool> {
    match result {
        Ok(_) | Err(CacheError::KeyNotFound { .. }) => Some(true),
        Err(CacheError::UpstreamInvalidResponse { .. }) => Some(false),
        Err(err) if err.is_retryable() => Some(false),
        Err(_) => None,
    }
}

/// Which path started an upstream fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// A caller missed the cache
    Request,
    /// The background scheduler is re-priming a key
    Refresh,
}

struct InFlight<V> {
    generation: u64,
    started_at: Instant,
    outcome: watch::Receiver<Outcome<V>>,
}

/// Coalesces concurrent fetches for one domain.
pub struct RequestCoalescer<V> {
    domain: Domain,
    in_flight: Arc<Mutex<HashMap<String, InFlight<V>>>>,
    next_generation: AtomicU64,
    retry: RetryPolicy,
    timeout: Duration,
    metrics: MetricsRecorder,
    health: Arc<Mutex<HealthTracker>>,
}

impl<V> RequestCoalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        domain: Domain,
        retry: RetryPolicy,
        timeout: Duration,
        metrics: MetricsRecorder,
        health: HealthTracker,
    ) -> Self {
        Self {
            domain,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            retry,
            timeout,
            metrics,
            health: Arc::new(Mutex::new(health)),
        }
    }

    /// Resolve `key`, joining an in-flight fetch if one exists.
    ///
    /// The leader's `commit` runs before the in-flight entry is released,
    /// and only if the entry was not cancelled in the meantime.
    #[instrument(skip(self, fetch, commit), fields(domain = %self.domain))]
    pub async fn resolve<F, Fut, C, CFut>(
        &self,
        key: &str,
        origin: FetchOrigin,
        cost_estimate: f64,
        fetch: F,
        commit: C,
    ) -> Result<V, CacheError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
        C: FnOnce(V) -> CFut + Send + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        let receiver = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(key) {
                Some(entry) => {
                    if origin == FetchOrigin::Request {
                        self.metrics.record_miss(self.domain).await;
                    }
                    debug!(
                        "Joining in-flight {} fetch for '{}' started {:?} ago",
                        self.domain,
                        key,
                        entry.started_at.elapsed()
                    );
                    entry.outcome.clone()
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(
                        key.to_string(),
                        InFlight {
                            generation,
                            started_at: Instant::now(),
                            outcome: receiver.clone(),
                        },
                    );
                    let ticket = self.metrics.fetch_started(self.domain, origin).await;
                    self.spawn_leader(key.to_string(), generation, ticket, cost_estimate, fetch, commit, sender);
                    receiver
                }
            }
        };

        self.wait(receiver, key).await
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_leader<F, Fut, C, CFut>(
        &self,
        key: String,
        generation: u64,
        ticket: FetchTicket,
        cost_estimate: f64,
        fetch: F,
        commit: C,
        sender: watch::Sender<Outcome<V>>,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
        C: FnOnce(V) -> CFut + Send + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        let domain = self.domain;
        let retry = self.retry.clone();
        let timeout = self.timeout;
        let metrics = self.metrics.clone();
        let health = self.health.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            // The fetch runs in its own task so a panicking adapter still
            // leaves an outcome to publish and an in-flight entry to release
            let task = tokio::spawn(async move { retry.run(domain, timeout, fetch).await });
            let (result, attempts) = match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!("{} upstream fetch for '{}' died: {}", domain, key, err);
                    (
                        Err(CacheError::FetchAbandoned {
                            domain,
                            key: key.clone(),
                        }),
                        1,
                    )
                }
            };
            let latency = started.elapsed();
            let success = result.is_ok();

            let retries = u64::from(attempts.saturating_sub(1));
            metrics.fetch_finished(ticket, success, cost_estimate, latency, retries).await;
            if let Some(healthy) = health_signal(&result) {
                health.lock().await.record(healthy);
            }

            {
                let mut entries = in_flight.lock().await;
                let current = entries.get(&key).is_some_and(|entry| entry.generation == generation);
                if current {
                    if let Ok(value) = &result {
                        commit(value.clone()).await;
                    }
                    entries.remove(&key);
                } else {
                    debug!("{} fetch for '{}' was detached, outcome not stored", domain, key);
                }
            }

            if let Err(err) = &result {
                warn!("{} upstream fetch for '{}' failed: {}", domain, key, err);
            }
            // No receivers left is fine: every caller gave up
            let _ = sender.send(Some(result));
        });
    }

    async fn wait(&self, mut receiver: watch::Receiver<Outcome<V>>, key: &str) -> Result<V, CacheError> {
        let abandoned = || CacheError::FetchAbandoned {
            domain: self.domain,
            key: key.to_string(),
        };

        let outcome = receiver.wait_for(Option::is_some).await.map_err(|_| abandoned())?;
        outcome.clone().unwrap_or_else(|| Err(abandoned()))
    }

    /// Detach the in-flight fetch for `key`. Current waiters still get its
    /// outcome; the next caller starts a new fetch.
    pub async fn cancel(&self, key: &str) -> bool {
        let detached = self.in_flight.lock().await.remove(key).is_some();
        if detached {
            debug!("Detached in-flight {} fetch for '{}'", self.domain, key);
        }
        detached
    }

    pub async fn cancel_all(&self) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        let count = in_flight.len();
        in_flight.clear();
        count
    }

    pub async fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().await.contains_key(key)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub async fn health(&self) -> HealthStats {
        self.health.lock().await.stats()
    }
}
