//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use truthlens::{AnalysisResult, CacheError, Comment, Domain, MarketData, Payload, UpstreamAdapter};

/// Upstream stand-in that counts invocations. The payload it returns carries
/// the invocation number so tests can tell a refetch from a cached value.
pub struct FakeAdapter {
    domain: Domain,
    calls: AtomicUsize,
    delay: Duration,
    cost: f64,
    /// Failures served before the adapter starts succeeding
    transient_failures: AtomicUsize,
    /// Calls that panic before the adapter starts behaving
    panics: AtomicUsize,
    /// Error returned on every call while set
    failure: Mutex<Option<CacheError>>,
    /// Domain of the payload returned, when it should differ from `domain`
    payload_domain: Option<Domain>,
}

impl FakeAdapter {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            cost: 0.0,
            transient_failures: AtomicUsize::new(0),
            panics: AtomicUsize::new(0),
            failure: Mutex::new(None),
            payload_domain: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_panics(self, count: usize) -> Self {
        self.panics.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_payload_domain(mut self, domain: Domain) -> Self {
        self.payload_domain = Some(domain);
        self
    }

    pub fn failing(self, error: CacheError) -> Self {
        self.set_failure(Some(error));
        self
    }

    pub fn set_failure(&self, error: Option<CacheError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamAdapter for FakeAdapter {
    fn domain(&self) -> Domain {
        self.domain
    }

    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch(&self, key: &str) -> Result<Payload, CacheError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let panicking = self
            .panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panicking {
            panic!("fake {} adapter panicked on call {}", self.domain, call);
        }

        let failure = self.failure.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(CacheError::unavailable(self.domain, "connection reset"));
        }

        Ok(payload(self.payload_domain.unwrap_or(self.domain), key, call))
    }

    fn cost_estimate(&self) -> f64 {
        self.cost
    }
}

/// Payload for `domain` stamped with `call`.
pub fn payload(domain: Domain, key: &str, call: usize) -> Payload {
    match domain {
        Domain::Markets => Payload::Market(market(key, call as f64)),
        Domain::Comments => Payload::Comments(vec![Comment {
            market_id: key.to_string(),
            url: "https://www.reuters.com/markets/crypto".to_string(),
            text: format!("Inflows reached $2.1 billion (call {})", call),
            author: "reporter".to_string(),
            created_at: Utc::now(),
            score: call as i64,
            source: "fake".to_string(),
        }]),
        Domain::Analysis => Payload::Analysis(AnalysisResult {
            market_id: key.to_string(),
            credibility_score: call.min(100) as u8,
            risk_index: 0,
            confidence: 0.5,
            links_analyzed: 0,
            per_link: HashMap::new(),
            reasons: vec![format!("call {}", call)],
            question: None,
            summary: None,
            analyzed_at: Utc::now(),
        }),
    }
}

pub fn market(key: &str, price: f64) -> MarketData {
    MarketData {
        market_id: key.to_string(),
        name: key.to_string(),
        question: format!("Will {} close higher?", key),
        price_24h: vec![price; 7],
        volume_24h: vec![1000; 7],
        current_price: price,
        market_cap: 0.0,
        change_24h: 0.0,
    }
}

/// Invocation stamp of a payload produced by [`FakeAdapter`].
pub fn stamp(payload: &Payload) -> usize {
    match payload {
        Payload::Market(market) => market.current_price as usize,
        Payload::Comments(comments) => comments.first().map_or(0, |c| c.score as usize),
        Payload::Analysis(analysis) => analysis.credibility_score as usize,
    }
}

pub struct Fakes {
    pub markets: Arc<FakeAdapter>,
    pub comments: Arc<FakeAdapter>,
    pub analysis: Arc<FakeAdapter>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::with(
            FakeAdapter::new(Domain::Markets),
            FakeAdapter::new(Domain::Comments),
            FakeAdapter::new(Domain::Analysis),
        )
    }

    pub fn with(markets: FakeAdapter, comments: FakeAdapter, analysis: FakeAdapter) -> Self {
        Self {
            markets: Arc::new(markets),
            comments: Arc::new(comments),
            analysis: Arc::new(analysis),
        }
    }

    pub fn adapter(&self, domain: Domain) -> &FakeAdapter {
        match domain {
            Domain::Markets => self.markets.as_ref(),
            Domain::Comments => self.comments.as_ref(),
            Domain::Analysis => self.analysis.as_ref(),
        }
    }

    pub fn manager(&self, builder: truthlens::CacheBuilder) -> truthlens::CacheManager {
        builder
            .build(self.markets.clone(), self.comments.clone(), self.analysis.clone())
            .expect("valid cache configuration")
    }
}
