//! Configuration and entry types for the cache core.

use crate::cache::error::CacheError;
use crate::cache::retry::RetryPolicy;
use crate::types::Domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// TTL and upstream policy for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainPolicy {
    /// Entry lifetime in seconds
    pub ttl_seconds: u64,
    /// Lead time before expiry at which the scheduler re-primes hot keys
    pub refresh_before_expiry_seconds: Option<u64>,
    /// Per-attempt upstream timeout in milliseconds
    pub upstream_timeout_ms: u64,
}

impl DomainPolicy {
    pub fn new(ttl_seconds: u64, refresh_before_expiry_seconds: Option<u64>, upstream_timeout_ms: u64) -> Self {
        Self {
            ttl_seconds,
            refresh_before_expiry_seconds,
            upstream_timeout_ms,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Period of the background refresh cycle: TTL minus the lead time.
    pub fn refresh_period(&self) -> Duration {
        let lead = self.refresh_before_expiry_seconds.unwrap_or(0);
        Duration::from_secs(self.ttl_seconds.saturating_sub(lead).max(1))
    }

    pub fn default_for(domain: Domain) -> Self {
        match domain {
            Domain::Markets => Self::new(1800, Some(300), 10_000),
            Domain::Comments => Self::new(3600, Some(600), 15_000),
            // Hourly analysis cycle, 30s budget for the inference call
            Domain::Analysis => Self::new(7200, Some(3600), 30_000),
        }
    }
}

/// Static configuration for the whole cache core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub markets: DomainPolicy,
    pub comments: DomainPolicy,
    pub analysis: DomainPolicy,
    /// Bounded retry applied by the request coalescer
    pub retry: RetryPolicy,
    /// Capacity bound of each domain partition
    pub max_entries_per_domain: u64,
    /// Interval of the optional expired-entry sweep
    pub sweep_interval_seconds: Option<u64>,
    /// Market ids the analysis cycle always covers
    pub tracked_markets: Vec<String>,
    /// Consecutive failures before a domain is reported degraded
    pub health_failure_threshold: u32,
    /// Outcomes kept for the health success rate
    pub health_sample_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            markets: DomainPolicy::default_for(Domain::Markets),
            comments: DomainPolicy::default_for(Domain::Comments),
            analysis: DomainPolicy::default_for(Domain::Analysis),
            retry: RetryPolicy::default(),
            max_entries_per_domain: 1000,
            sweep_interval_seconds: Some(300),
            tracked_markets: vec![
                "bitcoin_market".to_string(),
                "ethereum_market".to_string(),
                "binancecoin_market".to_string(),
            ],
            health_failure_threshold: 2,
            health_sample_size: 20,
        }
    }
}

impl CacheConfig {
    pub fn policy(&self, domain: Domain) -> &DomainPolicy {
        match domain {
            Domain::Markets => &self.markets,
            Domain::Comments => &self.comments,
            Domain::Analysis => &self.analysis,
        }
    }

    pub fn policy_mut(&mut self, domain: Domain) -> &mut DomainPolicy {
        match domain {
            Domain::Markets => &mut self.markets,
            Domain::Comments => &mut self.comments,
            Domain::Analysis => &mut self.analysis,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CacheError> {
        for domain in Domain::ALL {
            let policy = self.policy(domain);
            if policy.ttl_seconds == 0 {
                return Err(CacheError::Config(format!("{} ttl_seconds must be greater than 0", domain)));
            }
            if policy.upstream_timeout_ms == 0 {
                return Err(CacheError::Config(format!(
                    "{} upstream_timeout_ms must be greater than 0",
                    domain
                )));
            }
            if let Some(lead) = policy.refresh_before_expiry_seconds {
                if lead >= policy.ttl_seconds {
                    return Err(CacheError::Config(format!(
                        "{} refresh lead ({}s) must be shorter than its ttl ({}s)",
                        domain, lead, policy.ttl_seconds
                    )));
                }
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(CacheError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.max_entries_per_domain == 0 {
            return Err(CacheError::Config("max_entries_per_domain must be greater than 0".to_string()));
        }
        if self.sweep_interval_seconds == Some(0) {
            return Err(CacheError::Config("sweep_interval_seconds must be greater than 0".to_string()));
        }
        if self.health_failure_threshold == 0 || self.health_sample_size == 0 {
            return Err(CacheError::Config("health thresholds must be greater than 0".to_string()));
        }

        Ok(())
    }
}

/// A cached value with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub domain: Domain,
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// Wall-clock time of insertion, for reporting
    pub cached_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn new(domain: Domain, key: impl Into<String>, value: V, ttl: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            key: key.into(),
            domain,
            value,
            created_at,
            expires_at: created_at + ttl,
            cached_at: Utc::now(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.created_at)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn time_to_live(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Outcome of a store lookup. `Miss` and `Expired` are internal signals,
/// never surfaced to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Hit(V),
    Miss,
    /// Entry existed but had expired; it has been removed
    Expired,
}

impl<V> Lookup<V> {
    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Expired => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Target of a clear or reset operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Domain(Domain),
    All,
}

impl Scope {
    pub fn includes(&self, domain: Domain) -> bool {
        match self {
            Scope::Domain(d) => *d == domain,
            Scope::All => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        let config = CacheConfig::default();
        assert_eq!(config.markets.ttl_seconds, 1800);
        assert_eq!(config.comments.ttl_seconds, 3600);
        assert_eq!(config.analysis.ttl_seconds, 7200);
        assert_eq!(config.analysis.upstream_timeout(), Duration::from_secs(30));
        assert_eq!(config.analysis.refresh_period(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_refresh_period_without_lead_is_ttl() {
        let policy = DomainPolicy::new(60, None, 1000);
        assert_eq!(policy.refresh_period(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_lead_longer_than_ttl() {
        let mut config = CacheConfig::default();
        config.markets.refresh_before_expiry_seconds = Some(1800);
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = CacheConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"markets": {"ttl_seconds": 2, "refresh_before_expiry_seconds": null, "upstream_timeout_ms": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.markets.ttl_seconds, 2);
        assert_eq!(config.comments.ttl_seconds, 3600);
        assert_eq!(config.tracked_markets.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiry() {
        let entry = CacheEntry::new(Domain::Markets, "bitcoin_market", 1u64, Duration::from_secs(2));
        assert!(!entry.is_expired());
        assert_eq!(entry.ttl(), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(entry.is_expired());
        assert_eq!(entry.time_to_live(), Duration::ZERO);
    }

    #[test]
    fn test_scope_includes() {
        assert!(Scope::All.includes(Domain::Analysis));
        assert!(Scope::Domain(Domain::Markets).includes(Domain::Markets));
        assert!(!Scope::Domain(Domain::Markets).includes(Domain::Comments));
    }
}
