//! Cache orchestration: read-through caching per domain and the management
//! surface consumed by the HTTP layer.

use crate::cache::coalescer::{FetchOrigin, RequestCoalescer};
use crate::cache::error::CacheError;
use crate::cache::health::{HealthStats, HealthTracker};
use crate::cache::metrics::{MetricsRecorder, UsageMetrics};
use crate::cache::scheduler::{RefreshScheduler, SchedulerHandle};
use crate::cache::store::TtlStore;
use crate::cache::types::{CacheConfig, DomainPolicy, Lookup, Scope};
use crate::types::{Domain, Payload};
use crate::upstream::{question_key, UpstreamAdapter, QUESTION_KEY_PREFIX};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Read-through cache for one domain.
pub struct DomainCache {
    domain: Domain,
    policy: DomainPolicy,
    store: Arc<TtlStore<Arc<Payload>>>,
    coalescer: RequestCoalescer<Arc<Payload>>,
    adapter: Arc<dyn UpstreamAdapter>,
    metrics: MetricsRecorder,
    /// Last read per key, for picking hot keys to refresh. Bounded like the
    /// store; only keys that were served are recorded.
    recency: Cache<String, Instant>,
}

impl DomainCache {
    fn new(
        config: &CacheConfig,
        domain: Domain,
        store: Arc<TtlStore<Arc<Payload>>>,
        adapter: Arc<dyn UpstreamAdapter>,
        metrics: MetricsRecorder,
    ) -> Result<Self, CacheError> {
        if adapter.domain() != domain {
            return Err(CacheError::Config(format!(
                "adapter '{}' serves {} but was registered for {}",
                adapter.name(),
                adapter.domain(),
                domain
            )));
        }

        let policy = config.policy(domain).clone();
        let health = HealthTracker::new(domain, config.health_failure_threshold, config.health_sample_size);
        let coalescer = RequestCoalescer::new(
            domain,
            config.retry.clone(),
            policy.upstream_timeout(),
            metrics.clone(),
            health,
        );

        let recency = Cache::builder()
            .max_capacity(config.max_entries_per_domain)
            .time_to_live(policy.ttl())
            .build();

        Ok(Self {
            domain,
            policy,
            store,
            coalescer,
            adapter,
            metrics,
            recency,
        })
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn policy(&self) -> &DomainPolicy {
        &self.policy
    }

    /// Serve from cache, or fetch once upstream on a miss.
    ///
    /// Values are never served past their TTL.
    #[instrument(skip(self), fields(domain = %self.domain))]
    pub async fn get_or_fetch(&self, key: &str) -> Result<Arc<Payload>, CacheError> {
        if let Lookup::Hit(value) = self.store.get(self.domain, key).await {
            self.metrics.record_hit(self.domain).await;
            self.recency.insert(key.to_string(), Instant::now()).await;
            debug!("Cache hit for {} '{}'", self.domain, key);
            return Ok(value);
        }

        // The coalescer counts the miss
        let value = self.fetch(key, FetchOrigin::Request).await?;
        self.recency.insert(key.to_string(), Instant::now()).await;
        Ok(value)
    }

    /// Re-fetch `key` and replace its entry. No hit or miss is counted.
    #[instrument(skip(self), fields(domain = %self.domain))]
    pub async fn refresh(&self, key: &str) -> Result<Arc<Payload>, CacheError> {
        self.fetch(key, FetchOrigin::Refresh).await
    }

    async fn fetch(&self, key: &str, origin: FetchOrigin) -> Result<Arc<Payload>, CacheError> {
        let domain = self.domain;

        let adapter = self.adapter.clone();
        let fetch_key = key.to_string();
        let fetch = move || {
            let adapter = adapter.clone();
            let key = fetch_key.clone();
            async move {
                let payload = adapter.fetch(&key).await?;
                if payload.domain() != domain {
                    return Err(CacheError::invalid_response(
                        domain,
                        format!("adapter '{}' returned a {} payload", adapter.name(), payload.domain()),
                    ));
                }
                Ok(Arc::new(payload))
            }
        };

        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let ttl = self.policy.ttl();
        let commit_key = key.to_string();
        let commit = move |value: Arc<Payload>| async move {
            store.put(domain, &commit_key, value, ttl).await;
            metrics.record_write(domain).await;
        };

        self.coalescer
            .resolve(key, origin, self.adapter.cost_estimate(), fetch, commit)
            .await
    }

    /// Drop the entry for `key` and detach any in-flight fetch for it.
    #[instrument(skip(self), fields(domain = %self.domain))]
    pub async fn invalidate(&self, key: &str) -> bool {
        self.coalescer.cancel(key).await;
        self.store.invalidate(self.domain, key).await
    }

    pub async fn clear(&self) {
        self.coalescer.cancel_all().await;
        self.store.clear(Scope::Domain(self.domain)).await;
    }

    /// Cached keys read within the last `window`.
    pub async fn hot_keys(&self, window: Duration) -> Vec<String> {
        let mut keys = Vec::new();
        for key in self.store.keys(self.domain) {
            let hot = self
                .recency
                .get(&key)
                .await
                .is_some_and(|accessed| accessed.elapsed() <= window);
            if hot {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    /// Number of keys with a recorded read.
    pub async fn tracked_keys(&self) -> u64 {
        self.recency.run_pending_tasks().await;
        self.recency.entry_count()
    }

    /// Hot keys over the domain's refresh period.
    pub async fn refresh_candidates(&self) -> Vec<String> {
        self.hot_keys(self.policy.refresh_period()).await
    }

    pub async fn stats(&self) -> DomainStats {
        DomainStats {
            entries: self.store.len(self.domain),
            ttl_minutes: self.policy.ttl_seconds as f64 / 60.0,
            refresh_before_expiry_seconds: self.policy.refresh_before_expiry_seconds,
            hot_keys: self.refresh_candidates().await.len(),
            tracked_keys: self.tracked_keys().await,
            in_flight: self.coalescer.in_flight_count().await,
        }
    }

    pub async fn health(&self) -> HealthStats {
        self.coalescer.health().await
    }
}

/// Per-domain cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStats {
    pub entries: usize,
    pub ttl_minutes: f64,
    pub refresh_before_expiry_seconds: Option<u64>,
    pub hot_keys: usize,
    /// Keys with a recorded read, bounded by the domain capacity
    pub tracked_keys: u64,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub domains: BTreeMap<Domain, DomainStats>,
    pub total_entries: usize,
    /// Analysis entries answering free-form questions
    pub question_entries: usize,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub domains: BTreeMap<Domain, HealthStats>,
    pub captured_at: DateTime<Utc>,
}

/// Entry point for the cache core: one `DomainCache` per domain plus the
/// background schedulers.
pub struct CacheManager {
    config: CacheConfig,
    store: Arc<TtlStore<Arc<Payload>>>,
    metrics: MetricsRecorder,
    domains: HashMap<Domain, Arc<DomainCache>>,
    schedulers: RwLock<HashMap<Domain, SchedulerHandle>>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl CacheManager {
    pub fn new(
        config: CacheConfig,
        markets: Arc<dyn UpstreamAdapter>,
        comments: Arc<dyn UpstreamAdapter>,
        analysis: Arc<dyn UpstreamAdapter>,
    ) -> Result<Self, CacheError> {
        Self::with_analysis(config, markets, comments, |_, _| analysis)
    }

    /// Build a manager whose analysis adapter reads through the markets and
    /// comments caches.
    pub fn with_analysis<F>(
        config: CacheConfig,
        markets: Arc<dyn UpstreamAdapter>,
        comments: Arc<dyn UpstreamAdapter>,
        analysis: F,
    ) -> Result<Self, CacheError>
    where
        F: FnOnce(Arc<DomainCache>, Arc<DomainCache>) -> Arc<dyn UpstreamAdapter>,
    {
        config.validate()?;

        let store = Arc::new(TtlStore::new(&config));
        let metrics = MetricsRecorder::new();
        let domain_cache = |domain, adapter| {
            DomainCache::new(&config, domain, store.clone(), adapter, metrics.clone()).map(Arc::new)
        };

        let markets = domain_cache(Domain::Markets, markets)?;
        let comments = domain_cache(Domain::Comments, comments)?;
        let analysis = domain_cache(Domain::Analysis, analysis(markets.clone(), comments.clone()))?;

        let domains = HashMap::from([
            (Domain::Markets, markets),
            (Domain::Comments, comments),
            (Domain::Analysis, analysis),
        ]);

        info!(
            "Created cache manager: TTLs markets {}s, comments {}s, analysis {}s",
            config.markets.ttl_seconds, config.comments.ttl_seconds, config.analysis.ttl_seconds
        );

        Ok(Self {
            config,
            store,
            metrics,
            domains,
            schedulers: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn domain(&self, domain: Domain) -> Arc<DomainCache> {
        // Every domain is registered in the constructor
        self.domains[&domain].clone()
    }

    pub async fn get_or_fetch(&self, domain: Domain, key: &str) -> Result<Arc<Payload>, CacheError> {
        self.domain(domain).get_or_fetch(key).await
    }

    /// Analyse a free-form question. Answers are cached in the analysis
    /// domain under the normalised question.
    #[instrument(skip(self))]
    pub async fn analyze_question(&self, question: &str) -> Result<Arc<Payload>, CacheError> {
        let key = question_key(question)?;
        self.get_or_fetch(Domain::Analysis, &key).await
    }

    pub async fn invalidate(&self, domain: Domain, key: &str) -> bool {
        self.domain(domain).invalidate(key).await
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, scope: Scope) {
        for (domain, cache) in &self.domains {
            if scope.includes(*domain) {
                cache.clear().await;
            }
        }
        info!("Cleared cache for {:?}", scope);
    }

    pub async fn clear_all(&self) {
        self.clear(Scope::All).await;
    }

    /// Drop expired entries in every domain.
    pub async fn sweep(&self) -> usize {
        self.store.sweep().await
    }

    /// Force an out-of-cycle refresh run for `domain`.
    pub async fn trigger_scheduled_run(&self, domain: Domain) -> Result<(), CacheError> {
        let schedulers = self.schedulers.read().await;
        let handle = schedulers
            .get(&domain)
            .ok_or(CacheError::SchedulerUnavailable { domain })?;
        handle.trigger()
    }

    pub async fn scheduler(&self, domain: Domain) -> Option<SchedulerHandle> {
        self.schedulers.read().await.get(&domain).cloned()
    }

    /// Spawn one refresh scheduler per domain, plus the expired-entry
    /// sweeper when configured.
    pub async fn start_schedulers(&self) -> Result<Vec<JoinHandle<()>>, CacheError> {
        let mut schedulers = self.schedulers.write().await;
        if !schedulers.is_empty() {
            return Err(CacheError::Config("schedulers are already running".to_string()));
        }

        let mut handles = Vec::new();
        for domain in Domain::ALL {
            let pinned = if domain == Domain::Analysis {
                self.config.tracked_markets.clone()
            } else {
                Vec::new()
            };
            let (scheduler, handle) = RefreshScheduler::new(self.domain(domain), pinned);
            handles.push(tokio::spawn(scheduler.run()));
            schedulers.insert(domain, handle);
        }

        if let Some(seconds) = self.config.sweep_interval_seconds {
            let store = self.store.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(seconds));
                // First tick completes immediately; nothing has expired yet
                interval.tick().await;
                loop {
                    interval.tick().await;
                    store.sweep().await;
                }
            }));
        }

        self.tasks
            .lock()
            .await
            .extend(handles.iter().map(JoinHandle::abort_handle));
        info!("Started {} background tasks", handles.len());
        Ok(handles)
    }

    /// Stop every background task started by `start_schedulers`.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.schedulers.write().await.clear();
        info!("Stopped background schedulers");
    }

    pub async fn metrics_snapshot(&self) -> UsageMetrics {
        self.metrics.snapshot().await
    }

    pub async fn reset_metrics(&self, scope: Scope) {
        self.metrics.reset(scope).await;
    }

    pub async fn cache_stats(&self) -> CacheStats {
        let mut domains = BTreeMap::new();
        for (domain, cache) in &self.domains {
            domains.insert(*domain, cache.stats().await);
        }
        let total_entries = domains.values().map(|s| s.entries).sum();
        let question_entries = self
            .store
            .keys(Domain::Analysis)
            .iter()
            .filter(|key| key.starts_with(QUESTION_KEY_PREFIX))
            .count();

        CacheStats {
            domains,
            total_entries,
            question_entries,
            captured_at: Utc::now(),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let mut domains = BTreeMap::new();
        for (domain, cache) in &self.domains {
            domains.insert(*domain, cache.health().await);
        }

        HealthReport {
            domains,
            captured_at: Utc::now(),
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
