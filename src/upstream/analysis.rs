//! AI analysis of a market, composed from the markets and comments caches,
//! or of a free-form question.

use crate::cache::error::CacheError;
use crate::cache::orchestrator::DomainCache;
use crate::types::{AnalysisResult, Comment, Domain, Payload};
use crate::upstream::scoring::InferenceClient;
use crate::upstream::UpstreamAdapter;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Prefix of analysis keys that carry a free-form question instead of a
/// market id.
pub const QUESTION_KEY_PREFIX: &str = "question:";
const MIN_QUESTION_CHARS: usize = 5;

/// Analysis cache key for a free-form question. Questions that differ only
/// in case or whitespace share a key.
pub fn question_key(question: &str) -> Result<String, CacheError> {
    let normalized = question.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if normalized.chars().count() < MIN_QUESTION_CHARS {
        return Err(CacheError::invalid_request(
            Domain::Analysis,
            format!("question must be at least {} characters long", MIN_QUESTION_CHARS),
        ));
    }
    Ok(format!("{}{}", QUESTION_KEY_PREFIX, normalized))
}

/// Produces `AnalysisResult`s. Market data and comments are read through
/// their own caches, so an analysis run reuses whatever is already cached.
pub struct AnalysisAdapter {
    markets: Arc<DomainCache>,
    comments: Arc<DomainCache>,
    inference: Arc<dyn InferenceClient>,
}

impl AnalysisAdapter {
    pub fn new(markets: Arc<DomainCache>, comments: Arc<DomainCache>, inference: Arc<dyn InferenceClient>) -> Self {
        Self {
            markets,
            comments,
            inference,
        }
    }

    /// Comments are optional input; a failure degrades to no comments.
    async fn comments_for(&self, key: &str) -> Vec<Comment> {
        match self.comments.get_or_fetch(key).await {
            Ok(payload) => payload.as_comments().map(<[Comment]>::to_vec).unwrap_or_default(),
            Err(e) => {
                warn!("Analysing {} without comments: {}", key, e);
                Vec::new()
            }
        }
    }

    #[instrument(skip(self), fields(inference = %self.inference.name()))]
    async fn analyze_market(&self, key: &str) -> Result<Payload, CacheError> {
        let payload = self.markets.get_or_fetch(key).await?;
        let market = payload
            .as_market()
            .ok_or_else(|| CacheError::invalid_response(Domain::Markets, "expected a market payload"))?;
        let comments = self.comments_for(key).await;

        let assessment = self.inference.assess(market, &comments).await?;
        info!(
            "Analysed {}: credibility {}, risk {}",
            key, assessment.credibility_score, assessment.risk_index
        );

        Ok(Payload::Analysis(AnalysisResult {
            market_id: market.market_id.clone(),
            credibility_score: assessment.credibility_score,
            risk_index: assessment.risk_index,
            confidence: assessment.confidence,
            links_analyzed: assessment.per_link.len(),
            per_link: assessment.per_link,
            reasons: assessment.reasons,
            question: None,
            summary: assessment.summary,
            analyzed_at: Utc::now(),
        }))
    }

    #[instrument(skip(self), fields(inference = %self.inference.name()))]
    async fn analyze_question(&self, key: &str, question: &str) -> Result<Payload, CacheError> {
        let assessment = self.inference.answer(question).await?;
        info!(
            "Answered question '{}': credibility {}, risk {}",
            question, assessment.credibility_score, assessment.risk_index
        );

        Ok(Payload::Analysis(AnalysisResult {
            market_id: key.to_string(),
            credibility_score: assessment.credibility_score,
            risk_index: assessment.risk_index,
            confidence: assessment.confidence,
            links_analyzed: assessment.per_link.len(),
            per_link: assessment.per_link,
            reasons: assessment.reasons,
            question: Some(question.to_string()),
            summary: assessment.summary,
            analyzed_at: Utc::now(),
        }))
    }
}

#[async_trait]
impl UpstreamAdapter for AnalysisAdapter {
    fn domain(&self) -> Domain {
        Domain::Analysis
    }

    fn name(&self) -> &str {
        "analysis"
    }

    async fn fetch(&self, key: &str) -> Result<Payload, CacheError> {
        match key.strip_prefix(QUESTION_KEY_PREFIX) {
            Some(question) => self.analyze_question(key, question).await,
            None => self.analyze_market(key).await,
        }
    }

    fn cost_estimate(&self) -> f64 {
        self.inference.cost_estimate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_key_normalizes() {
        let key = question_key("  Will BTC   reach $100k?\n").unwrap();
        assert_eq!(key, "question:will btc reach $100k?");
        assert_eq!(question_key("will btc reach $100K?").unwrap(), key);
    }

    #[test]
    fn test_short_question_is_rejected() {
        assert_eq!(
            question_key("  eth ").unwrap_err(),
            CacheError::invalid_request(Domain::Analysis, "question must be at least 5 characters long")
        );
        assert!(question_key("").is_err());
    }
}
