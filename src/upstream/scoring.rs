//! Credibility and risk scoring behind the analysis domain.
//!
//! [`InferenceClient`] is the seam for a hosted model. [`HeuristicInference`]
//! is the local implementation: keyword and statistics based, free and
//! deterministic.

use crate::cache::error::CacheError;
use crate::types::{Comment, MarketData};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Output of one inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub credibility_score: u8,
    pub risk_index: u8,
    pub confidence: f64,
    pub per_link: HashMap<String, u8>,
    pub reasons: Vec<String>,
    pub summary: Option<String>,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &str;

    async fn assess(&self, market: &MarketData, comments: &[Comment]) -> Result<Assessment, CacheError>;

    /// Assess a free-form market question.
    async fn answer(&self, question: &str) -> Result<Assessment, CacheError>;

    /// Estimated cost of one `assess` call.
    fn cost_estimate(&self) -> f64 {
        0.0
    }
}

const REPUTABLE: &[&str] = &["reuters", "bbc", "apnews", "bloomberg", "ft.com", "wsj.com"];
const LOW_REPUTATION: &[&str] = &[".biz", "blogspot", "substack", "telegram", "t.me"];

const PUMP_SIGNALS: &[&str] = &[
    "to the moon", "diamond hands", "hodl", "buy the dip", "rocket", "🚀", "moon", "💎", "ape in", "yolo",
];
const DUMP_SIGNALS: &[&str] = &[
    "sell everything", "crash incoming", "bubble burst", "ponzi", "scam", "rug pull", "exit liquidity",
];
const URGENCY_WORDS: &[&str] = &[
    "now", "immediately", "last chance", "limited time", "don't miss", "act fast", "urgent", "breaking",
];
const EMOTIONAL_TRIGGERS: &[&str] = &[
    "fear", "greed", "fomo", "panic", "euphoria", "devastating", "amazing", "incredible", "shocking",
];

const PREDICTION_WORDS: &[&str] = &["predict", "forecast", "will", "reach", "price"];
const MANIPULATION_WORDS: &[&str] = &["manipulation", "pump", "dump", "scam"];
const SKEPTIC_WORDS: &[&str] = &["credibility", "reliable", "trust", "legitimate"];
const QUESTION_CONFIDENCE: f64 = 0.6;

/// Freshness component of a link score until real timestamps are weighed.
const FRESHNESS_PLACEHOLDER: f64 = 70.0;
const ORDER_FLOW_IMBALANCE: f64 = 40.0;
const SENTIMENT_VOLATILITY_FALLBACK: f64 = 30.0;
const COORDINATION_PENALTY: f64 = 30.0;
const ILLIQUID_VOLUME: u64 = 800;

/// Local, rule-based inference.
#[derive(Debug, Clone, Default)]
pub struct HeuristicInference;

impl HeuristicInference {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InferenceClient for HeuristicInference {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn assess(&self, market: &MarketData, comments: &[Comment]) -> Result<Assessment, CacheError> {
        let credibility = credibility_score(comments);
        let link_variance = match (credibility.per_link.values().max(), credibility.per_link.values().min()) {
            (Some(max), Some(min)) if credibility.per_link.len() > 1 => f64::from(max - min),
            _ => 0.0,
        };
        let risk = risk_score(market, link_variance, comments);

        let mut reasons = credibility.reasons;
        reasons.extend(risk.reasons);

        Ok(Assessment {
            credibility_score: credibility.score,
            risk_index: risk.score,
            confidence: credibility.confidence,
            per_link: credibility.per_link,
            reasons,
            summary: None,
        })
    }

    async fn answer(&self, question: &str) -> Result<Assessment, CacheError> {
        Ok(answer_question(question))
    }
}

struct CredibilityBreakdown {
    score: u8,
    confidence: f64,
    per_link: HashMap<String, u8>,
    reasons: Vec<String>,
}

struct RiskBreakdown {
    score: u8,
    reasons: Vec<String>,
}

fn host_of(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let host = rest.split(['/', '?', '#']).next()?.to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Reputation of a link's host, 0-100.
pub fn domain_reputation(url: &str) -> u8 {
    let Some(host) = host_of(url) else {
        return 20;
    };
    if REPUTABLE.iter().any(|k| host.contains(k)) {
        90
    } else if LOW_REPUTATION.iter().any(|k| host.contains(k)) {
        30
    } else {
        55
    }
}

/// Rewards concrete figures and direct quotes, 40-70.
pub fn citation_score(text: &str) -> u8 {
    if text.is_empty() {
        return 40;
    }
    let numeric = text.chars().any(|c| c.is_ascii_digit() || c == '%' || c == '$');
    let quoted = text.contains('"');
    40 + if numeric { 20 } else { 0 } + if quoted { 10 } else { 0 }
}

fn link_score(url: &str, text: &str) -> f64 {
    0.6 * f64::from(domain_reputation(url)) + 0.3 * f64::from(citation_score(text)) + 0.1 * FRESHNESS_PLACEHOLDER
}

fn credibility_score(comments: &[Comment]) -> CredibilityBreakdown {
    let mut per_link = HashMap::new();
    let mut total = 0.0;
    let mut analyzed = 0usize;

    for comment in comments.iter().filter(|c| !c.url.is_empty()) {
        let score = link_score(&comment.url, &comment.text);
        per_link.insert(comment.url.clone(), clamp_score(score));
        total += score;
        analyzed += 1;
    }

    let (score, confidence) = if analyzed > 0 {
        (clamp_score(total / analyzed as f64), 0.5)
    } else {
        (50, 0.3)
    };

    let reasons = vec![
        if analyzed > 0 {
            format!("Analyzed {} source(s) with heuristic scoring.", analyzed)
        } else {
            "No sources found; using neutral baseline.".to_string()
        },
        format!("Average analysis confidence: {:.2}", confidence),
        "Combined domain reputation and citation analysis.".to_string(),
    ];

    CredibilityBreakdown {
        score,
        confidence,
        per_link,
        reasons,
    }
}

/// Z-score of the last point; 0 for empty or constant series.
fn last_zscore(values: &[f64]) -> f64 {
    let Some(last) = values.last() else {
        return 0.0;
    };
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 {
        0.0
    } else {
        (last - mean) / std
    }
}

/// Pattern hits per comment, normalised to 0-1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PatternSignals {
    pump: f64,
    dump: f64,
    urgency: f64,
    emotion: f64,
}

impl PatternSignals {
    fn analyze(text: &str) -> Self {
        let lower = text.to_lowercase();
        let words = lower.split_whitespace().count() as f64;
        let hits = |patterns: &[&str]| patterns.iter().filter(|p| lower.contains(*p)).count() as f64;
        let norm = |count: f64, density: f64| (count / (words * density).max(1.0)).min(1.0);

        Self {
            pump: norm(hits(PUMP_SIGNALS), 0.1),
            dump: norm(hits(DUMP_SIGNALS), 0.1),
            urgency: norm(hits(URGENCY_WORDS), 0.05),
            emotion: norm(hits(EMOTIONAL_TRIGGERS), 0.1),
        }
    }

    fn manipulation_risk(&self) -> f64 {
        (self.pump + self.dump + self.urgency + self.emotion) / 4.0
    }

    /// Bullish minus bearish signal, -1 to 1.
    fn sentiment(&self) -> f64 {
        (self.pump - self.dump).clamp(-1.0, 1.0)
    }
}

fn sentiment_volatility(comments: &[Comment], reasons: &mut Vec<String>) -> f64 {
    if comments.is_empty() {
        return SENTIMENT_VOLATILITY_FALLBACK;
    }

    let signals: Vec<PatternSignals> = comments.iter().map(|c| PatternSignals::analyze(&c.text)).collect();
    let n = signals.len() as f64;
    let manipulation = signals.iter().map(PatternSignals::manipulation_risk).sum::<f64>() / n;
    let sentiment = signals.iter().map(PatternSignals::sentiment).sum::<f64>() / n;

    let mut seen = HashSet::new();
    let coordinated = comments
        .iter()
        .any(|c| !seen.insert(c.text.trim().to_lowercase()));
    let coordination = if coordinated { COORDINATION_PENALTY } else { 0.0 };

    if coordinated {
        reasons.push("Coordinated posting detected (duplicate comment text)".to_string());
    }
    if manipulation > 0.7 {
        reasons.push("High manipulation risk in sentiment patterns".to_string());
    }
    if sentiment.abs() > 0.8 {
        reasons.push("Extreme sentiment detected (potential manipulation)".to_string());
    }

    (0.5 * manipulation * 100.0 + 0.3 * sentiment.abs() * 50.0 + 0.2 * coordination)
        .round()
        .min(100.0)
}

fn risk_score(market: &MarketData, link_variance: f64, comments: &[Comment]) -> RiskBreakdown {
    let volumes: Vec<f64> = market.volume_24h.iter().map(|v| *v as f64).collect();
    let last_price_z = last_zscore(&market.price_24h).abs();
    let last_volume_z = last_zscore(&volumes).abs();
    let anomaly = (60.0 + 10.0 * last_price_z.max(last_volume_z)).round().min(100.0);

    let mut extra_reasons = Vec::new();
    let sentiment = sentiment_volatility(comments, &mut extra_reasons);

    let last_volume = market.volume_24h.last().copied().unwrap_or(0);
    let illiquidity = if last_volume < ILLIQUID_VOLUME { 10.0 } else { 0.0 };

    let risk = 0.30 * anomaly
        + 0.20 * ORDER_FLOW_IMBALANCE
        + 0.30 * sentiment
        + 0.10 * link_variance
        + 0.10 * illiquidity;

    let mut reasons = vec![
        format!("On-chain anomaly detection: {}/100", anomaly),
        format!("Order flow analysis: {}/100 (placeholder)", ORDER_FLOW_IMBALANCE),
        format!("Sentiment volatility: {}/100", sentiment),
        format!("Source quality variance: {}", link_variance),
        format!("Illiquidity penalty: {}", illiquidity),
    ];
    reasons.extend(extra_reasons);

    RiskBreakdown {
        score: clamp_score(risk),
        reasons,
    }
}

/// Keyword assessment of a free-form question. The first matching
/// category wins.
pub fn answer_question(question: &str) -> Assessment {
    let lower = question.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let (credibility, risk, reason, summary) = if mentions(PREDICTION_WORDS) {
        (
            45,
            75,
            "Price prediction",
            "Price predictions are highly uncertain: regulation, sentiment and macro conditions all move crypto \
             markets. Treat specific price targets with caution.",
        )
    } else if mentions(MANIPULATION_WORDS) {
        (
            70,
            85,
            "Manipulation topic",
            "Crypto markets do see manipulation such as pump-and-dump schemes. Verify claims against several \
             reliable sources and watch for coordinated promotion.",
        )
    } else if mentions(SKEPTIC_WORDS) {
        (
            80,
            40,
            "Credibility check",
            "Questioning credibility is sound practice. Cross-reference sources, check analysts' track records \
             and prefer balanced analysis that states its risks.",
        )
    } else {
        (
            60,
            55,
            "General market question",
            "Market conditions show typical volatility. Combine several data sources and recent developments \
             for the most accurate picture.",
        )
    };

    Assessment {
        credibility_score: credibility,
        risk_index: risk,
        confidence: QUESTION_CONFIDENCE,
        per_link: HashMap::new(),
        reasons: vec![reason.to_string()],
        summary: Some(summary.to_string()),
    }
}

fn clamp_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}
