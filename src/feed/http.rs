//! Quote feed over a Yahoo-style JSON chart endpoint.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::retry::{with_retry, RetryPolicy, StatusError};
use super::{IndexChange, MarketSummary, Quote, QuoteFeed};
use crate::config::FeedConfig;

pub struct HttpQuoteFeed {
    client: Client,
    base: String,
    index_symbols: Vec<String>,
    retry: RetryPolicy,
}

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    meta: ChartMeta,
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    symbol: String,
    #[serde(rename = "longName")]
    long_name: Option<String>,
    #[serde(rename = "shortName")]
    short_name: Option<String>,
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<QuoteSeries>,
}

#[derive(Deserialize, Debug)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Daily series decoded from a chart response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub quote: Quote,
    /// Daily volumes before the latest session, oldest first.
    pub prior_volumes: Vec<f64>,
}

pub fn parse_chart(raw: &str) -> Result<ChartSeries> {
    let env: ChartEnvelope = serde_json::from_str(raw).context("decoding chart response")?;
    if let Some(err) = env.chart.error {
        return Err(anyhow!(
            "chart error {}: {}",
            err.code.unwrap_or_default(),
            err.description.unwrap_or_default()
        ));
    }
    let result = env
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| anyhow!("empty chart result"))?;
    let series = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("chart has no quote series"))?;

    let closes: Vec<f64> = series.close.into_iter().flatten().collect();
    let mut volumes: Vec<f64> = series.volume.into_iter().flatten().collect();
    if closes.len() < 2 {
        return Err(anyhow!("need two closes for {}", result.meta.symbol));
    }
    let last = closes[closes.len() - 1];
    let prev = closes[closes.len() - 2];
    if prev <= 0.0 {
        return Err(anyhow!("non-positive previous close for {}", result.meta.symbol));
    }
    let volume = volumes.pop().unwrap_or(0.0);

    let meta = result.meta;
    let name = meta
        .long_name
        .or(meta.short_name)
        .unwrap_or_else(|| meta.symbol.clone());
    Ok(ChartSeries {
        quote: Quote {
            price: meta.regular_market_price.unwrap_or(last),
            change_percent: (last - prev) / prev * 100.0,
            volume,
            name,
            symbol: meta.symbol,
        },
        prior_volumes: volumes,
    })
}

impl HttpQuoteFeed {
    pub fn new(cfg: &FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base: cfg.base_url.trim_end_matches('/').to_string(),
            index_symbols: cfg.index_symbols.clone(),
            retry: RetryPolicy::from_feed(cfg),
        })
    }

    async fn fetch_chart(&self, symbol: &str, range: &str) -> Result<ChartSeries> {
        let url = format!("{}/v8/finance/chart/{}", self.base, symbol);
        let client = &self.client;
        let url = url.as_str();
        with_retry(&self.retry, symbol, move || async move {
            let resp = client
                .get(url)
                .query(&[("interval", "1d"), ("range", range)])
                .send()
                .await
                .with_context(|| format!("GET {}", url))?;
            let status = resp.status();
            let body = resp.text().await.context("reading chart body")?;
            if !status.is_success() {
                return Err(anyhow::Error::new(StatusError::new(status.as_u16(), symbol)));
            }
            parse_chart(&body)
        })
        .await
    }
}

fn range_for(days: usize) -> &'static str {
    match days {
        0..=4 => "5d",
        5..=20 => "1mo",
        21..=60 => "3mo",
        _ => "6mo",
    }
}

#[async_trait]
impl QuoteFeed for HttpQuoteFeed {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        Ok(self.fetch_chart(symbol, "5d").await?.quote)
    }

    async fn fetch_volume_history(&self, symbol: &str, days: usize) -> Result<Vec<f64>> {
        let series = self.fetch_chart(symbol, range_for(days)).await?;
        let v = series.prior_volumes;
        let skip = v.len().saturating_sub(days);
        Ok(v[skip..].to_vec())
    }

    async fn fetch_market_summary(&self) -> Result<MarketSummary> {
        let mut indices = Vec::with_capacity(self.index_symbols.len());
        for symbol in &self.index_symbols {
            let q = self.fetch_quote(symbol).await?;
            indices.push(IndexChange {
                symbol: symbol.clone(),
                change_percent: q.change_percent,
            });
        }
        Ok(MarketSummary { indices })
    }
}
