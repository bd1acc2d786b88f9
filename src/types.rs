//! Core types shared by the cache core and the upstream adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Cached data category. Each domain has its own TTL policy and upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Market price snapshots
    Markets,
    /// Social comments attached to a market
    Comments,
    /// AI-derived credibility and risk analysis
    Analysis,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Markets, Domain::Comments, Domain::Analysis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Markets => "markets",
            Domain::Comments => "comments",
            Domain::Analysis => "analysis",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a single prediction market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub market_id: String,
    pub name: String,
    pub question: String,
    /// Recent price points, oldest first
    pub price_24h: Vec<f64>,
    /// Recent volume points, oldest first
    pub volume_24h: Vec<u64>,
    pub current_price: f64,
    pub market_cap: f64,
    /// 24h change in percent
    pub change_24h: f64,
}

/// A social comment or source link referencing a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub market_id: String,
    pub url: String,
    pub text: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub score: i64,
    pub source: String,
}

/// Credibility and manipulation-risk assessment of a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub market_id: String,
    /// 0-100, higher is more credible
    pub credibility_score: u8,
    /// 0-100, higher is riskier
    pub risk_index: u8,
    /// 0.0-1.0
    pub confidence: f64,
    pub links_analyzed: usize,
    /// Per-link credibility scores keyed by URL
    pub per_link: HashMap<String, u8>,
    pub reasons: Vec<String>,
    /// Free-form question this analysis answers, for question keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Narrative explanation from the inference client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

/// Value stored in the cache. One variant per domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Market(MarketData),
    Comments(Vec<Comment>),
    Analysis(AnalysisResult),
}

impl Payload {
    /// The domain this payload belongs to.
    pub fn domain(&self) -> Domain {
        match self {
            Payload::Market(_) => Domain::Markets,
            Payload::Comments(_) => Domain::Comments,
            Payload::Analysis(_) => Domain::Analysis,
        }
    }

    pub fn as_market(&self) -> Option<&MarketData> {
        match self {
            Payload::Market(market) => Some(market),
            _ => None,
        }
    }

    pub fn as_comments(&self) -> Option<&[Comment]> {
        match self {
            Payload::Comments(comments) => Some(comments),
            _ => None,
        }
    }

    pub fn as_analysis(&self) -> Option<&AnalysisResult> {
        match self {
            Payload::Analysis(analysis) => Some(analysis),
            _ => None,
        }
    }
}
