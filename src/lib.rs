//! TruthLens - caching and request orchestration core for a prediction-market
//! oracle.
//!
//! Market data, social comments and AI analysis each live in their own cache
//! domain with a TTL policy. Concurrent misses for one key share a single
//! upstream fetch, hot keys are refreshed in the background before they
//! expire, and every cache and upstream interaction is metered.

pub mod cache;
pub mod types;
pub mod upstream;

use std::sync::Arc;

pub use cache::{CacheConfig, CacheError, CacheManager, DomainPolicy, RetryPolicy, Scope, UsageMetrics};
pub use types::{AnalysisResult, Comment, Domain, MarketData, Payload};
pub use upstream::{UpstreamAdapter, UpstreamConfig};

use upstream::{AnalysisAdapter, CoinGeckoComments, CoinGeckoMarkets, HttpUpstream, InferenceClient};

/// Cache builder for convenient construction with sensible defaults.
pub struct CacheBuilder {
    config: CacheConfig,
}

impl CacheBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    /// Set a domain's TTL in seconds.
    pub fn with_ttl(mut self, domain: Domain, ttl_seconds: u64) -> Self {
        self.config.policy_mut(domain).ttl_seconds = ttl_seconds;
        self
    }

    /// Set how long before expiry hot keys of a domain are refreshed.
    pub fn with_refresh_lead(mut self, domain: Domain, lead_seconds: Option<u64>) -> Self {
        self.config.policy_mut(domain).refresh_before_expiry_seconds = lead_seconds;
        self
    }

    /// Set a domain's per-attempt upstream timeout.
    pub fn with_upstream_timeout(mut self, domain: Domain, timeout_ms: u64) -> Self {
        self.config.policy_mut(domain).upstream_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the entry bound of each domain.
    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.config.max_entries_per_domain = max_entries;
        self
    }

    /// Set the market ids every analysis run covers.
    pub fn with_tracked_markets(mut self, markets: Vec<String>) -> Self {
        self.config.tracked_markets = markets;
        self
    }

    /// Set or disable the expired-entry sweep.
    pub fn with_sweep_interval(mut self, seconds: Option<u64>) -> Self {
        self.config.sweep_interval_seconds = seconds;
        self
    }

    pub fn with_health_thresholds(mut self, failure_threshold: u32, sample_size: usize) -> Self {
        self.config.health_failure_threshold = failure_threshold;
        self.config.health_sample_size = sample_size;
        self
    }

    /// Build the cache configuration.
    pub fn build_config(self) -> CacheConfig {
        self.config
    }

    /// Build a manager over the given adapters.
    pub fn build(
        self,
        markets: Arc<dyn UpstreamAdapter>,
        comments: Arc<dyn UpstreamAdapter>,
        analysis: Arc<dyn UpstreamAdapter>,
    ) -> Result<CacheManager, CacheError> {
        CacheManager::new(self.config, markets, comments, analysis)
    }

    /// Build a manager backed by CoinGecko, with analysis composed from the
    /// markets and comments caches.
    pub fn build_coingecko(
        self,
        upstream: UpstreamConfig,
        inference: Arc<dyn InferenceClient>,
    ) -> anyhow::Result<CacheManager> {
        let http = HttpUpstream::new(upstream)?;
        let markets: Arc<dyn UpstreamAdapter> = Arc::new(CoinGeckoMarkets::new(http.clone()));
        let comments: Arc<dyn UpstreamAdapter> = Arc::new(CoinGeckoComments::new(http));

        let manager = CacheManager::with_analysis(self.config, markets, comments, |markets, comments| {
            Arc::new(AnalysisAdapter::new(markets, comments, inference)) as Arc<dyn UpstreamAdapter>
        })?;
        Ok(manager)
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_builder() {
        let config = CacheBuilder::new()
            .with_ttl(Domain::Markets, 2)
            .with_refresh_lead(Domain::Markets, None)
            .with_upstream_timeout(Domain::Analysis, 500)
            .with_tracked_markets(vec!["ETH".to_string()])
            .with_sweep_interval(None)
            .build_config();

        assert_eq!(config.markets.ttl_seconds, 2);
        assert_eq!(config.markets.refresh_before_expiry_seconds, None);
        assert_eq!(config.analysis.upstream_timeout_ms, 500);
        assert_eq!(config.tracked_markets, vec!["ETH".to_string()]);
        assert_eq!(config.sweep_interval_seconds, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_builder_defaults() {
        let config = CacheBuilder::new().build_config();

        assert_eq!(config.markets.ttl_seconds, 1800);
        assert_eq!(config.comments.ttl_seconds, 3600);
        assert_eq!(config.analysis.ttl_seconds, 7200);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.max_entries_per_domain, 1000);
    }

    #[tokio::test]
    async fn test_build_coingecko_wires_every_domain() {
        let manager = CacheBuilder::new()
            .build_coingecko(UpstreamConfig::default(), Arc::new(upstream::HeuristicInference::new()))
            .unwrap();

        for domain in Domain::ALL {
            assert_eq!(manager.domain(domain).domain(), domain);
        }
        assert_eq!(manager.cache_stats().await.total_entries, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = CacheBuilder::new()
            .with_ttl(Domain::Comments, 0)
            .build_coingecko(UpstreamConfig::default(), Arc::new(upstream::HeuristicInference::new()));
        assert!(result.is_err());
    }
}
