//! Upstream adapters: the slow, rate-limited or paid services behind each
//! cache domain.

pub mod analysis;
pub mod comments;
pub mod markets;
pub mod rate_limit;
pub mod scoring;

pub use analysis::{question_key, AnalysisAdapter, QUESTION_KEY_PREFIX};
pub use comments::CoinGeckoComments;
pub use markets::CoinGeckoMarkets;
pub use rate_limit::AdaptiveRateLimiter;
pub use scoring::{Assessment, HeuristicInference, InferenceClient};

use crate::cache::error::CacheError;
use crate::types::{Domain, Payload};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A source of fresh values for one domain.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Domain whose payloads this adapter produces
    fn domain(&self) -> Domain;

    fn name(&self) -> &str;

    async fn fetch(&self, key: &str) -> Result<Payload, CacheError>;

    /// Estimated monetary cost of one successful call.
    fn cost_estimate(&self) -> f64 {
        0.0
    }
}

/// Settings for the HTTP upstreams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub coingecko_base_url: String,
    /// Custom market feed read instead of CoinGecko when set
    pub market_feed_url: Option<String>,
    pub requests_per_second: u32,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            coingecko_base_url: "https://api.coingecko.com/api/v3".to_string(),
            market_feed_url: None,
            // CoinGecko's free tier allows roughly 30 calls per minute
            requests_per_second: 1,
            user_agent: concat!("truthlens/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP plumbing shared by the CoinGecko adapters.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
    limiter: Arc<AdaptiveRateLimiter>,
    config: UpstreamConfig,
}

impl HttpUpstream {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        let limiter = Arc::new(AdaptiveRateLimiter::new(config.requests_per_second, 20, 0.2));

        Ok(Self { client, limiter, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.coingecko_base_url.trim_end_matches('/'), path)
    }

    /// GET `url` as JSON under the shared rate limit.
    ///
    /// A 404 maps to `KeyNotFound` for `key`; other failures are classified
    /// by [`classify`].
    pub async fn get_json<T>(&self, domain: Domain, key: &str, url: &str, query: &[(&str, &str)]) -> Result<T, CacheError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.limiter.acquire().await;

        let result = self.send(domain, key, url, query).await;
        // Rate-limit feedback counts transport trouble only
        let healthy = !matches!(
            result,
            Err(CacheError::UpstreamUnavailable { .. } | CacheError::UpstreamTimeout { .. })
        );
        self.limiter.record(healthy).await;
        result
    }

    async fn send<T>(&self, domain: Domain, key: &str, url: &str, query: &[(&str, &str)]) -> Result<T, CacheError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| classify(domain, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CacheError::key_not_found(domain, key));
        }
        let response = response.error_for_status().map_err(|e| classify(domain, e))?;
        response.json::<T>().await.map_err(|e| classify(domain, e))
    }
}

/// Map a reqwest failure onto the cache error taxonomy.
pub fn classify(domain: Domain, err: reqwest::Error) -> CacheError {
    if err.is_timeout() {
        CacheError::UpstreamTimeout { domain, timeout_ms: 0 }
    } else if err.is_decode() {
        CacheError::invalid_response(domain, err.to_string())
    } else {
        CacheError::unavailable(domain, err.to_string())
    }
}

/// Coin id for a market key such as `bitcoin_market` or `usd_coin_market`.
pub fn coin_id_for(key: &str) -> Option<String> {
    let coin = key.strip_suffix("_market")?;
    if coin.is_empty() {
        return None;
    }
    Some(coin.replace('_', "-"))
}

/// Market key for a CoinGecko coin id.
pub fn market_key_for(coin_id: &str) -> String {
    format!("{}_market", coin_id.replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_key_mapping() {
        assert_eq!(coin_id_for("bitcoin_market").as_deref(), Some("bitcoin"));
        assert_eq!(coin_id_for("usd_coin_market").as_deref(), Some("usd-coin"));
        assert_eq!(coin_id_for("_market"), None);
        assert_eq!(coin_id_for("ETH"), None);
        assert_eq!(market_key_for("usd-coin"), "usd_coin_market");
    }

    #[test]
    fn test_upstream_config_defaults() {
        let config = UpstreamConfig::default();
        assert!(config.coingecko_base_url.starts_with("https://"));
        assert!(config.market_feed_url.is_none());
        assert!(config.user_agent.starts_with("truthlens/"));
    }

    #[test]
    fn test_url_joins_path() {
        let upstream = HttpUpstream::new(UpstreamConfig {
            coingecko_base_url: "http://localhost:9/api/".to_string(),
            ..UpstreamConfig::default()
        })
        .unwrap();
        assert_eq!(upstream.url("simple/price"), "http://localhost:9/api/simple/price");
    }
}
