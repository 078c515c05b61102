//! Market data contracts
//!
//! Price and token-metric feeds are external collaborators; the engine
//! consumes them through these narrow traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// A real-time price observation for one token
#[derive(Debug, Clone)]
pub struct PriceEvent {
    pub token_mint: String,
    /// Price denominated in SOL. All trading decisions use this.
    pub price_sol: f64,
    /// USD price, for display only
    pub price_usd: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub source_tag: String,
}

/// Price feed capability consumed by the paper executor and sizing logic
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current price of a token in SOL, if known
    async fn price_sol(&self, mint: &str) -> Result<Option<f64>>;

    /// Current price of a token in USD, if known
    async fn price_usd(&self, mint: &str) -> Result<Option<f64>>;
}

/// Liquidity and holder metrics used by the pre-trade validation gate
#[derive(Debug, Clone, Default)]
pub struct TokenMetrics {
    pub liquidity_usd: f64,
    pub holder_count: u64,
    pub spread_pct: f64,
}

/// Scanner-provided token metrics capability
#[async_trait]
pub trait TokenMetricsSource: Send + Sync {
    async fn metrics(&self, mint: &str) -> Result<Option<TokenMetrics>>;
}

/// Price source backed by the most recent observation per mint. The price
/// event ingest loop records into it; paper fills and trade sizing read
/// from it.
#[derive(Default)]
pub struct LastPriceCache {
    prices: dashmap::DashMap<String, (f64, Option<f64>)>,
}

impl LastPriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &PriceEvent) {
        self.prices.insert(
            event.token_mint.clone(),
            (event.price_sol, event.price_usd),
        );
    }
}

#[async_trait]
impl PriceSource for LastPriceCache {
    async fn price_sol(&self, mint: &str) -> Result<Option<f64>> {
        Ok(self.prices.get(mint).map(|entry| entry.0))
    }

    async fn price_usd(&self, mint: &str) -> Result<Option<f64>> {
        Ok(self.prices.get(mint).and_then(|entry| entry.1))
    }
}

/// Metrics source used when no scanner is wired; the validation gate skips
/// liquidity checks for unknown tokens.
pub struct NoMetrics;

#[async_trait]
impl TokenMetricsSource for NoMetrics {
    async fn metrics(&self, _mint: &str) -> Result<Option<TokenMetrics>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_last_price_cache_records_latest() {
        let cache = LastPriceCache::new();
        let mut event = PriceEvent {
            token_mint: "MintT".to_string(),
            price_sol: 0.0001,
            price_usd: Some(0.015),
            timestamp: Utc::now(),
            source_tag: "test".to_string(),
        };
        cache.record(&event);
        assert_eq!(cache.price_sol("MintT").await.unwrap(), Some(0.0001));
        assert_eq!(cache.price_usd("MintT").await.unwrap(), Some(0.015));

        event.price_sol = 0.0002;
        cache.record(&event);
        assert_eq!(cache.price_sol("MintT").await.unwrap(), Some(0.0002));
        assert_eq!(cache.price_sol("Other").await.unwrap(), None);
    }
}
