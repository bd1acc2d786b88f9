//! Market snapshots from CoinGecko or a custom feed.

use crate::cache::error::CacheError;
use crate::types::{Domain, MarketData, Payload};
use crate::upstream::{coin_id_for, HttpUpstream, UpstreamAdapter};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// Points in the synthetic price and volume history.
const HISTORY_POINTS: usize = 7;
/// Volume assumed when CoinGecko omits it.
const DEFAULT_VOLUME: f64 = 1_000_000.0;

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
    #[serde(default)]
    usd_24h_vol: Option<f64>,
    #[serde(default)]
    usd_market_cap: Option<f64>,
}

/// One market as served by a custom feed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedMarket {
    market_id: String,
    #[serde(default)]
    question: String,
    #[serde(rename = "price24h", default)]
    price_24h: Vec<f64>,
    #[serde(rename = "volume24h", default)]
    volume_24h: Vec<u64>,
    #[serde(rename = "current_price", default)]
    current_price: Option<f64>,
    #[serde(rename = "market_cap", default)]
    market_cap: f64,
    #[serde(rename = "change_24h", default)]
    change_24h: f64,
}

pub struct CoinGeckoMarkets {
    http: HttpUpstream,
}

impl CoinGeckoMarkets {
    pub fn new(http: HttpUpstream) -> Self {
        Self { http }
    }

    async fn fetch_coingecko(&self, key: &str) -> Result<MarketData, CacheError> {
        let coin_id = coin_id_for(key).ok_or_else(|| CacheError::key_not_found(Domain::Markets, key))?;

        let url = self.http.url("simple/price");
        let prices: HashMap<String, SimplePrice> = self
            .http
            .get_json(
                Domain::Markets,
                key,
                &url,
                &[
                    ("ids", coin_id.as_str()),
                    ("vs_currencies", "usd"),
                    ("include_24hr_change", "true"),
                    ("include_24hr_vol", "true"),
                    ("include_market_cap", "true"),
                ],
            )
            .await?;

        // CoinGecko answers `{}` for unknown ids
        let price = prices
            .get(&coin_id)
            .ok_or_else(|| CacheError::key_not_found(Domain::Markets, key))?;

        Ok(market_from_price(key, &coin_id, price))
    }

    async fn fetch_feed(&self, feed_url: &str, key: &str) -> Result<MarketData, CacheError> {
        let markets: Vec<FeedMarket> = self.http.get_json(Domain::Markets, key, feed_url, &[]).await?;
        debug!("Custom feed returned {} markets", markets.len());

        let market = markets
            .into_iter()
            .find(|m| m.market_id == key)
            .ok_or_else(|| CacheError::key_not_found(Domain::Markets, key))?;

        let current_price = market
            .current_price
            .or_else(|| market.price_24h.last().copied())
            .unwrap_or(0.0);

        Ok(MarketData {
            name: market.market_id.trim_end_matches("_market").to_string(),
            market_id: market.market_id,
            question: market.question,
            price_24h: market.price_24h,
            volume_24h: market.volume_24h,
            current_price,
            market_cap: market.market_cap,
            change_24h: market.change_24h,
        })
    }
}

#[async_trait]
impl UpstreamAdapter for CoinGeckoMarkets {
    fn domain(&self) -> Domain {
        Domain::Markets
    }

    fn name(&self) -> &str {
        "coingecko-markets"
    }

    #[instrument(skip(self), fields(adapter = "coingecko-markets"))]
    async fn fetch(&self, key: &str) -> Result<Payload, CacheError> {
        let market = match self.http.config().market_feed_url.clone() {
            Some(feed_url) => match self.fetch_feed(&feed_url, key).await {
                // The feed answered but does not list this market
                Err(err @ CacheError::KeyNotFound { .. }) => return Err(err),
                Err(err) => {
                    warn!("Custom market feed failed, falling back to CoinGecko: {}", err);
                    self.fetch_coingecko(key).await?
                }
                Ok(market) => market,
            },
            None => self.fetch_coingecko(key).await?,
        };
        Ok(Payload::Market(market))
    }
}

/// Build a market snapshot with a synthetic 7-point history that walks the
/// 24h change back from the current price.
fn market_from_price(key: &str, coin_id: &str, price: &SimplePrice) -> MarketData {
    let current_price = price.usd;
    let change_24h = price.usd_24h_change.unwrap_or(0.0);
    let current_volume = price.usd_24h_vol.unwrap_or(DEFAULT_VOLUME);
    let last = (HISTORY_POINTS - 1) as f64;

    let price_24h = (0..HISTORY_POINTS)
        .map(|i| {
            let variance = (change_24h / 100.0) * (i as f64 / last);
            (current_price * (1.0 - variance) * 100.0).round() / 100.0
        })
        .collect();

    let volume_24h = (0..HISTORY_POINTS)
        .map(|i| {
            let variance = 0.1 * (0.5 - (i % 3) as f64 / 6.0);
            (current_volume * (1.0 + variance)) as u64
        })
        .collect();

    MarketData {
        market_id: key.to_string(),
        name: title_case(coin_id),
        question: format!(
            "Will {} price be above ${:.2} next week?",
            title_case(coin_id),
            current_price * 1.1
        ),
        price_24h,
        volume_24h,
        current_price,
        market_cap: price.usd_market_cap.unwrap_or(0.0),
        change_24h,
    }
}

fn title_case(coin_id: &str) -> String {
    coin_id
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
