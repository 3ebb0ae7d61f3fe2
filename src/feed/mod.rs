use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod memory;
pub mod retry;

/// Latest quote for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change_percent: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexChange {
    pub symbol: String,
    pub change_percent: f64,
}

/// Broad market snapshot used to derive sentiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub indices: Vec<IndexChange>,
}

/// Source of quotes and trailing volume. Every failure is per symbol and
/// recoverable.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote>;
    /// Most recent `days` daily volumes, oldest first.
    async fn fetch_volume_history(&self, symbol: &str, days: usize) -> Result<Vec<f64>>;
    async fn fetch_market_summary(&self) -> Result<MarketSummary>;
}
