//! Scripted in-memory feed for tests and offline runs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{IndexChange, MarketSummary, Quote, QuoteFeed};

#[derive(Default)]
struct Script {
    quotes: HashMap<String, Quote>,
    volumes: HashMap<String, Vec<f64>>,
    failing: HashSet<String>,
    summary: Option<MarketSummary>,
}

/// Quotes can be replaced at any time through a shared reference, so a
/// running detector sees the next scripted state on its next cycle.
#[derive(Default)]
pub struct StaticFeed {
    script: Mutex<Script>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quote plus a flat volume history so that the volume ratio equals
    /// `volume_ratio`.
    pub fn with_move(self, symbol: &str, change_percent: f64, volume_ratio: f64) -> Self {
        self.set_move(symbol, change_percent, volume_ratio);
        self
    }

    pub fn with_failure(self, symbol: &str) -> Self {
        self.fail(symbol);
        self
    }

    pub fn with_indices(self, changes: &[(&str, f64)]) -> Self {
        self.set_indices(changes);
        self
    }

    pub fn set_move(&self, symbol: &str, change_percent: f64, volume_ratio: f64) {
        let base = 1_000_000.0;
        self.set_quote(Quote {
            symbol: symbol.to_string(),
            name: format!("{} Corp", symbol),
            price: 100.0 * (1.0 + change_percent / 100.0),
            change_percent,
            volume: base * volume_ratio,
        });
        self.set_volume_history(symbol, vec![base; 20]);
    }

    pub fn set_quote(&self, quote: Quote) {
        if let Ok(mut s) = self.script.lock() {
            s.failing.remove(&quote.symbol);
            s.quotes.insert(quote.symbol.clone(), quote);
        }
    }

    pub fn set_volume_history(&self, symbol: &str, volumes: Vec<f64>) {
        if let Ok(mut s) = self.script.lock() {
            s.volumes.insert(symbol.to_string(), volumes);
        }
    }

    pub fn fail(&self, symbol: &str) {
        if let Ok(mut s) = self.script.lock() {
            s.failing.insert(symbol.to_string());
        }
    }

    pub fn set_indices(&self, changes: &[(&str, f64)]) {
        if let Ok(mut s) = self.script.lock() {
            s.summary = Some(MarketSummary {
                indices: changes
                    .iter()
                    .map(|(sym, pct)| IndexChange {
                        symbol: sym.to_string(),
                        change_percent: *pct,
                    })
                    .collect(),
            });
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Script>> {
        self.script.lock().map_err(|_| anyhow!("feed script poisoned"))
    }
}

#[async_trait]
impl QuoteFeed for StaticFeed {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        let s = self.lock()?;
        if s.failing.contains(symbol) {
            return Err(anyhow!("scripted failure for {}", symbol));
        }
        s.quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("no quote for {}", symbol))
    }

    async fn fetch_volume_history(&self, symbol: &str, days: usize) -> Result<Vec<f64>> {
        let s = self.lock()?;
        if s.failing.contains(symbol) {
            return Err(anyhow!("scripted failure for {}", symbol));
        }
        let all = s
            .volumes
            .get(symbol)
            .ok_or_else(|| anyhow!("no volume history for {}", symbol))?;
        let skip = all.len().saturating_sub(days);
        Ok(all[skip..].to_vec())
    }

    async fn fetch_market_summary(&self) -> Result<MarketSummary> {
        let s = self.lock()?;
        s.summary.clone().ok_or_else(|| anyhow!("no market summary scripted"))
    }
}
