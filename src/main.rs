//! TruthLens cache demo.
//!
//! Wires the CoinGecko adapters and heuristic analysis into a cache manager,
//! starts the background schedulers, serves a few requests twice to show
//! cache hits and coalescing, then prints metrics, stats and health as JSON.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use truthlens::upstream::HeuristicInference;
use truthlens::{CacheBuilder, Domain, UpstreamConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting TruthLens cache demo");

    let upstream = UpstreamConfig {
        market_feed_url: std::env::var("MARKET_FEED_URL").ok(),
        ..UpstreamConfig::default()
    };

    let manager = Arc::new(
        CacheBuilder::new()
            .build_coingecko(upstream, Arc::new(HeuristicInference::new()))
            .context("Failed to build cache manager")?,
    );

    let handles = manager.start_schedulers().await?;

    // Concurrent requests for one market share a single upstream call
    let mut requests = Vec::new();
    for _ in 0..5 {
        let manager = manager.clone();
        requests.push(tokio::spawn(async move {
            manager.get_or_fetch(Domain::Analysis, "bitcoin_market").await
        }));
    }
    for request in requests {
        match request.await? {
            Ok(payload) => {
                if let Some(analysis) = payload.as_analysis() {
                    info!(
                        "bitcoin_market: credibility {}, risk {}",
                        analysis.credibility_score, analysis.risk_index
                    );
                }
            }
            Err(e) => warn!("Analysis request failed: {}", e),
        }
    }

    // Markets and comments for ethereum_market are usually warm by now
    for domain in Domain::ALL {
        if let Err(e) = manager.get_or_fetch(domain, "ethereum_market").await {
            warn!("{} request failed: {}", domain, e);
        }
    }

    // The second question hits the cached answer to the first
    for question in ["Will ETH reach $5k this year?", "  will eth reach $5K this year? "] {
        match manager.analyze_question(question).await {
            Ok(payload) => {
                if let Some(summary) = payload.as_analysis().and_then(|a| a.summary.as_deref()) {
                    info!("Question analysis: {}", summary);
                }
            }
            Err(e) => warn!("Question analysis failed: {}", e),
        }
    }

    manager.trigger_scheduled_run(Domain::Analysis).await?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let metrics = manager.metrics_snapshot().await;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    for suggestion in metrics.suggestions() {
        info!("Suggestion: {}", suggestion);
    }
    println!("{}", serde_json::to_string_pretty(&manager.cache_stats().await)?);
    println!("{}", serde_json::to_string_pretty(&manager.health().await)?);

    manager.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }

    info!("Demo completed");
    Ok(())
}
