//! Market commentary built from CoinGecko trending and coin data.

use crate::cache::error::CacheError;
use crate::types::{Comment, Domain, Payload};
use crate::upstream::{coin_id_for, HttpUpstream, UpstreamAdapter};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;

/// Trending coins turned into comments.
const TRENDING_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
struct Trending {
    #[serde(default)]
    coins: Vec<TrendingCoin>,
}

#[derive(Debug, Deserialize)]
struct TrendingCoin {
    item: TrendingItem,
}

#[derive(Debug, Deserialize)]
struct TrendingItem {
    id: String,
    name: String,
    symbol: String,
    market_cap_rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CoinDetail {
    name: String,
    market_data: Option<CoinMarketData>,
}

#[derive(Debug, Deserialize)]
struct CoinMarketData {
    #[serde(default)]
    price_change_percentage_24h: Option<f64>,
}

pub struct CoinGeckoComments {
    http: HttpUpstream,
}

impl CoinGeckoComments {
    pub fn new(http: HttpUpstream) -> Self {
        Self { http }
    }
}

#[async_trait]
impl UpstreamAdapter for CoinGeckoComments {
    fn domain(&self) -> Domain {
        Domain::Comments
    }

    fn name(&self) -> &str {
        "coingecko-comments"
    }

    #[instrument(skip(self), fields(adapter = "coingecko-comments"))]
    async fn fetch(&self, key: &str) -> Result<Payload, CacheError> {
        let coin_id = coin_id_for(key).ok_or_else(|| CacheError::key_not_found(Domain::Comments, key))?;

        let trending_url = self.http.url("search/trending");
        let trending: Trending = self.http.get_json(Domain::Comments, key, &trending_url, &[]).await?;

        let coin_url = self.http.url(&format!("coins/{}", coin_id));
        let detail: CoinDetail = self
            .http
            .get_json(
                Domain::Comments,
                key,
                &coin_url,
                &[
                    ("localization", "false"),
                    ("tickers", "false"),
                    ("community_data", "true"),
                    ("developer_data", "false"),
                ],
            )
            .await?;

        let mut comments = trending_comments(key, &trending);
        if let Some(note) = sentiment_comment(key, &coin_id, &detail) {
            comments.push(note);
        }
        Ok(Payload::Comments(comments))
    }
}

fn trending_comments(key: &str, trending: &Trending) -> Vec<Comment> {
    trending
        .coins
        .iter()
        .take(TRENDING_LIMIT)
        .map(|coin| {
            let item = &coin.item;
            let rank = item.market_cap_rank.map_or_else(|| "N/A".to_string(), |r| r.to_string());
            Comment {
                market_id: key.to_string(),
                url: format!("https://www.coingecko.com/en/coins/{}", item.id),
                text: format!(
                    "Trending: {} ({}) - Market cap rank #{}. High search interest indicates potential market movement.",
                    item.name, item.symbol, rank
                ),
                author: "coingecko_trending".to_string(),
                created_at: Utc::now(),
                // Higher score for better-ranked coins
                score: 1000 - i64::from(item.market_cap_rank.unwrap_or(999)),
                source: "coingecko_trending".to_string(),
            }
        })
        .collect()
}

fn sentiment_comment(key: &str, coin_id: &str, detail: &CoinDetail) -> Option<Comment> {
    let change = detail.market_data.as_ref()?.price_change_percentage_24h.unwrap_or(0.0);
    let sentiment = if change > 0.0 {
        "bullish"
    } else if change < -2.0 {
        "bearish"
    } else {
        "neutral"
    };

    Some(Comment {
        market_id: key.to_string(),
        url: format!("https://www.coingecko.com/en/coins/{}", coin_id),
        text: format!(
            "{} market analysis: 24h change {:.2}%. Market sentiment appears {}.",
            detail.name, change, sentiment
        ),
        author: "coingecko_market_data".to_string(),
        created_at: Utc::now(),
        score: (change * 10.0).abs() as i64,
        source: "coingecko_market".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trending_comments() {
        let trending: Trending = serde_json::from_str(
            r#"{"coins": [
                {"item": {"id": "pepe", "name": "Pepe", "symbol": "PEPE", "market_cap_rank": 40}},
                {"item": {"id": "newcoin", "name": "New", "symbol": "NEW", "market_cap_rank": null}}
            ]}"#,
        )
        .unwrap();

        let comments = trending_comments("bitcoin_market", &trending);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].market_id, "bitcoin_market");
        assert_eq!(comments[0].url, "https://www.coingecko.com/en/coins/pepe");
        assert_eq!(comments[0].score, 960);
        assert!(comments[1].text.contains("rank #N/A"));
        assert_eq!(comments[1].score, 1);
    }

    #[test]
    fn test_sentiment_comment() {
        let detail: CoinDetail = serde_json::from_str(
            r#"{"name": "Ethereum", "market_data": {"price_change_percentage_24h": -3.5}}"#,
        )
        .unwrap();
        let note = sentiment_comment("ethereum_market", "ethereum", &detail).unwrap();
        assert!(note.text.contains("bearish"));
        assert_eq!(note.score, 35);

        let bare: CoinDetail = serde_json::from_str(r#"{"name": "Ethereum"}"#).unwrap();
        assert!(sentiment_comment("ethereum_market", "ethereum", &bare).is_none());
    }
}
