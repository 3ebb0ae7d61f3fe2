//! Market anomaly detection.
//!
//! One scan fans out over the watchlist, one future per symbol, and joins
//! them individually: a symbol whose fetch fails is logged and dropped, the
//! rest of the scan proceeds.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::DetectorConfig;
use crate::error::PuzzleError;
use crate::feed::{MarketSummary, QuoteFeed};
use crate::logging::{log, log_event_detected, log_fetch_failure, obj, v_num, v_str, Domain, Level};
use crate::puzzle::PuzzleData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SharpDrop,
    SharpRise,
    HighVolume,
    VolatilitySpike,
    SectorDivergence,
    EarningsReaction,
    NewsDriven,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SharpDrop => "sharp_drop",
            EventType::SharpRise => "sharp_rise",
            EventType::HighVolume => "high_volume",
            EventType::VolatilitySpike => "volatility",
            EventType::SectorDivergence => "divergence",
            EventType::EarningsReaction => "earnings",
            EventType::NewsDriven => "news_driven",
        }
    }

    fn by_sign(change_percent: f64) -> Self {
        if change_percent < 0.0 {
            EventType::SharpDrop
        } else {
            EventType::SharpRise
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        }
    }

    /// Unknown labels read as neutral.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Sentiment::Bullish,
            "bearish" => Sentiment::Bearish,
            _ => Sentiment::Neutral,
        }
    }

    /// Bearish if any index fell past the band, else bullish if any rose past
    /// it, else neutral.
    pub fn from_summary(summary: &MarketSummary, band_pct: f64) -> Self {
        if summary.indices.iter().any(|i| i.change_percent < -band_pct) {
            Sentiment::Bearish
        } else if summary.indices.iter().any(|i| i.change_percent > band_pct) {
            Sentiment::Bullish
        } else {
            Sentiment::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub trigger_price: f64,
    pub change_percent: f64,
    pub volume_ratio: f64,
    pub event_type: EventType,
    pub sentiment: Sentiment,
    pub severity: Severity,
    /// Within [0, 1].
    pub worthiness: f64,
    pub detected_at: DateTime<Utc>,
    /// Peer symbol → percent change.
    pub peer_changes: BTreeMap<String, f64>,
    pub divergence_pp: f64,
}

impl MarketEvent {
    pub fn has_sector_divergence(&self) -> bool {
        if self.peer_changes.is_empty() {
            return false;
        }
        let mean = self.peer_changes.values().sum::<f64>() / self.peer_changes.len() as f64;
        (self.change_percent - mean).abs() > self.divergence_pp
    }

    pub fn to_puzzle_data(&self) -> PuzzleData {
        PuzzleData {
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            change_percent: self.change_percent,
            volume_ratio: self.volume_ratio,
            market_sentiment: self.sentiment.as_str().to_string(),
            time: self.detected_at.format("%H:%M").to_string(),
            sector_divergence: self.has_sector_divergence(),
            event_type: self.event_type.as_str().to_string(),
            severity: self.severity.as_str().to_string(),
            volatility: None,
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.to_puzzle_data().to_map()
    }
}

// =============================================================================
// Pure classification
// =============================================================================

pub fn volume_ratio(current: f64, history: &[f64]) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let mean = history.iter().sum::<f64>() / history.len() as f64;
    if mean > 0.0 {
        Some(current / mean)
    } else {
        None
    }
}

pub fn worthiness(change_percent: f64, volume_ratio: f64) -> f64 {
    ((change_percent.abs() / 5.0) * (volume_ratio / 3.0)).clamp(0.0, 1.0)
}

pub fn severity(change_percent: f64, volume_ratio: f64) -> Severity {
    let c = change_percent.abs();
    if c >= 10.0 || volume_ratio >= 5.0 {
        Severity::Critical
    } else if c >= 7.0 || volume_ratio >= 3.0 {
        Severity::High
    } else if c >= 5.0 || volume_ratio >= 2.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Candidate event types with their fitness, in rule order.
pub fn candidates(change_percent: f64, volume_ratio: f64, cfg: &DetectorConfig) -> Vec<(EventType, f64)> {
    let mut out = Vec::new();
    if change_percent.abs() >= cfg.sharp_movement_pct {
        out.push((EventType::by_sign(change_percent), change_percent.abs() / 10.0));
    }
    if volume_ratio >= cfg.volume_multiplier {
        out.push((EventType::HighVolume, (volume_ratio / 5.0).min(1.0)));
    }
    out
}

/// Event type when the combined gate holds, `None` otherwise.
pub fn classify(change_percent: f64, volume_ratio: f64, cfg: &DetectorConfig) -> Option<EventType> {
    if change_percent.abs() < cfg.combined_move_pct || volume_ratio < cfg.combined_volume_mult {
        return None;
    }
    let best = candidates(change_percent, volume_ratio, cfg)
        .into_iter()
        .fold(None::<(EventType, f64)>, |best, c| match best {
            Some(b) if b.1 >= c.1 => Some(b),
            _ => Some(c),
        });
    Some(best.map(|(t, _)| t).unwrap_or_else(|| EventType::by_sign(change_percent)))
}

// =============================================================================
// Event history
// =============================================================================

#[derive(Debug, Clone)]
struct SeenEvent {
    symbol: String,
    event_type: EventType,
    at: DateTime<Utc>,
}

/// Recently emitted events, for cooldown de-duplication.
#[derive(Debug, Clone)]
pub struct EventHistory {
    seen: Vec<SeenEvent>,
    cooldown: Duration,
    retention: Duration,
}

impl EventHistory {
    pub fn new(cooldown_secs: i64, retention_secs: i64) -> Self {
        Self {
            seen: Vec::new(),
            cooldown: Duration::seconds(cooldown_secs),
            retention: Duration::seconds(retention_secs),
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn is_duplicate(&self, symbol: &str, event_type: EventType, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.cooldown;
        self.seen
            .iter()
            .any(|e| e.symbol == symbol && e.event_type == event_type && e.at > cutoff)
    }

    pub fn record(&mut self, event: &MarketEvent) {
        self.seen.push(SeenEvent {
            symbol: event.symbol.clone(),
            event_type: event.event_type,
            at: event.detected_at,
        });
    }

    /// Drop records older than the retention window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.seen.retain(|e| e.at > cutoff);
    }

    /// Accept an event unless a same-symbol, same-type event is inside the
    /// cooldown window.
    pub fn admit(&mut self, event: &MarketEvent, now: DateTime<Utc>) -> Result<(), PuzzleError> {
        if self.is_duplicate(&event.symbol, event.event_type, now) {
            return Err(PuzzleError::DuplicateEvent {
                symbol: event.symbol.clone(),
                event_type: event.event_type.as_str().to_string(),
            });
        }
        self.record(event);
        Ok(())
    }
}

// =============================================================================
// Detector
// =============================================================================

pub struct EventDetector {
    feed: Arc<dyn QuoteFeed>,
    config: DetectorConfig,
    history: EventHistory,
    clock: SharedClock,
}

impl EventDetector {
    pub fn new(feed: Arc<dyn QuoteFeed>, config: DetectorConfig, clock: SharedClock) -> Self {
        let history = EventHistory::new(config.cooldown_secs, config.retention_secs);
        Self {
            feed,
            config,
            history,
            clock,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn history(&self) -> &EventHistory {
        &self.history
    }

    /// Scan the watchlist; qualifying, non-duplicate events sorted by
    /// worthiness, highest first.
    pub async fn detect_events(&mut self) -> Vec<MarketEvent> {
        let now = self.clock.now();
        let sentiment = self.market_sentiment().await;

        let checks = self
            .config
            .watchlist
            .iter()
            .map(|symbol| self.check_symbol(symbol, sentiment, now));
        let results = join_all(checks).await;

        let mut failures = 0usize;
        let mut events = Vec::new();
        for result in results {
            match result {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    if let PuzzleError::DataUnavailable { symbol, reason } = &e {
                        log_fetch_failure(symbol, reason);
                    }
                }
            }
        }

        let mut accepted = Vec::with_capacity(events.len());
        for event in events {
            match self.history.admit(&event, now) {
                Ok(()) => {
                    log_event_detected(
                        &event.symbol,
                        event.event_type.as_str(),
                        event.change_percent,
                        event.volume_ratio,
                        event.worthiness,
                    );
                    accepted.push(event);
                }
                Err(e) => log(
                    Level::Debug,
                    Domain::Detect,
                    "event_suppressed",
                    obj(&[("symbol", v_str(&event.symbol)), ("msg", v_str(&e.to_string()))]),
                ),
            }
        }
        self.history.prune(now);

        accepted.sort_by(|a, b| b.worthiness.total_cmp(&a.worthiness));
        log(
            Level::Info,
            Domain::Detect,
            "scan_complete",
            obj(&[
                ("watched", v_num(self.config.watchlist.len() as f64)),
                ("events", v_num(accepted.len() as f64)),
                ("failures", v_num(failures as f64)),
                ("sentiment", v_str(sentiment.as_str())),
            ]),
        );
        accepted
    }

    async fn market_sentiment(&self) -> Sentiment {
        match self.feed.fetch_market_summary().await {
            Ok(summary) => Sentiment::from_summary(&summary, self.config.sentiment_band_pct),
            Err(e) => {
                log(
                    Level::Warn,
                    Domain::Market,
                    "summary_unavailable",
                    obj(&[("msg", v_str(&e.to_string()))]),
                );
                Sentiment::Neutral
            }
        }
    }

    async fn check_symbol(
        &self,
        symbol: &str,
        sentiment: Sentiment,
        now: DateTime<Utc>,
    ) -> Result<Option<MarketEvent>, PuzzleError> {
        let unavailable = |reason: String| PuzzleError::DataUnavailable {
            symbol: symbol.to_string(),
            reason,
        };

        let quote = self
            .feed
            .fetch_quote(symbol)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let volumes = self
            .feed
            .fetch_volume_history(symbol, self.config.volume_history_days)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let ratio = volume_ratio(quote.volume, &volumes)
            .ok_or_else(|| unavailable("empty volume history".to_string()))?;

        let event_type = match classify(quote.change_percent, ratio, &self.config) {
            Some(t) => t,
            None => return Ok(None),
        };

        let peers = self.peer_changes(symbol).await;
        Ok(Some(MarketEvent {
            id: format!("{}_{}", symbol, now.format("%Y%m%d_%H%M")),
            symbol: symbol.to_string(),
            name: quote.name,
            trigger_price: quote.price,
            change_percent: quote.change_percent,
            volume_ratio: ratio,
            event_type,
            sentiment,
            severity: severity(quote.change_percent, ratio),
            worthiness: worthiness(quote.change_percent, ratio),
            detected_at: now,
            peer_changes: peers,
            divergence_pp: self.config.divergence_pp,
        }))
    }

    async fn peer_changes(&self, symbol: &str) -> BTreeMap<String, f64> {
        let peers: Vec<&String> = self.config.peers_of(symbol).iter().take(self.config.max_peers).collect();
        let quotes = join_all(peers.iter().map(|p| self.feed.fetch_quote(p))).await;
        peers
            .into_iter()
            .zip(quotes)
            .filter_map(|(p, q)| q.ok().map(|q| (p.clone(), q.change_percent)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feed::memory::StaticFeed;
    use chrono::TimeZone;

    fn cfg(watchlist: &[&str]) -> DetectorConfig {
        DetectorConfig {
            watchlist: watchlist.iter().map(|s| s.to_string()).collect(),
            ..DetectorConfig::default()
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 15, 0).unwrap()
    }

    #[test]
    fn test_documented_example() {
        let c = DetectorConfig::default();
        assert_eq!(classify(-8.5, 3.2, &c), Some(EventType::SharpDrop));
        assert_eq!(worthiness(-8.5, 3.2), 1.0);
        assert_eq!(severity(-8.5, 3.2), Severity::High);
    }

    #[test]
    fn test_combined_gate() {
        let c = DetectorConfig::default();
        assert_eq!(classify(-6.0, 1.5, &c), None);
        assert_eq!(classify(2.5, 4.0, &c), None);
        assert_eq!(classify(3.5, 2.1, &c), Some(EventType::SharpRise));
    }

    #[test]
    fn test_highest_fitness_wins() {
        let c = DetectorConfig::default();
        // sharp fitness 0.55, volume fitness 0.9
        assert_eq!(classify(5.5, 4.5, &c), Some(EventType::HighVolume));
        // sharp fitness 0.9, volume fitness 0.6
        assert_eq!(classify(-9.0, 3.0, &c), Some(EventType::SharpDrop));
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(severity(10.0, 1.0), Severity::Critical);
        assert_eq!(severity(1.0, 5.0), Severity::Critical);
        assert_eq!(severity(5.0, 1.0), Severity::Medium);
        assert_eq!(severity(1.0, 1.0), Severity::Low);
    }

    #[test]
    fn test_sentiment_from_summary() {
        let s = |a: f64, b: f64| MarketSummary {
            indices: vec![
                crate::feed::IndexChange { symbol: "A".into(), change_percent: a },
                crate::feed::IndexChange { symbol: "B".into(), change_percent: b },
            ],
        };
        assert_eq!(Sentiment::from_summary(&s(-2.5, 3.0), 2.0), Sentiment::Bearish);
        assert_eq!(Sentiment::from_summary(&s(0.5, 2.1), 2.0), Sentiment::Bullish);
        assert_eq!(Sentiment::from_summary(&s(1.0, -1.0), 2.0), Sentiment::Neutral);
    }

    #[test]
    fn test_history_cooldown_and_retention() {
        let mut h = EventHistory::new(3600, 86_400);
        let t0 = start();
        h.seen.push(SeenEvent { symbol: "X".into(), event_type: EventType::SharpDrop, at: t0 });
        assert!(h.is_duplicate("X", EventType::SharpDrop, t0 + Duration::minutes(59)));
        assert!(!h.is_duplicate("X", EventType::HighVolume, t0 + Duration::minutes(10)));
        assert!(!h.is_duplicate("X", EventType::SharpDrop, t0 + Duration::minutes(61)));
        h.prune(t0 + Duration::hours(23));
        assert_eq!(h.len(), 1);
        h.prune(t0 + Duration::hours(25));
        assert!(h.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_and_ordering() {
        let feed = StaticFeed::new()
            .with_move("AAA", -8.5, 3.2)
            .with_move("BBB", 4.0, 2.2)
            .with_failure("CCC")
            .with_move("DDD", 0.5, 1.0)
            .with_indices(&[("^KS11", -2.5), ("^KQ11", 0.0)]);
        let clock = ManualClock::new(start());
        let mut d = EventDetector::new(Arc::new(feed), cfg(&["BBB", "CCC", "AAA", "DDD"]), Arc::new(clock));

        let events = d.detect_events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].symbol, "AAA");
        assert_eq!(events[1].symbol, "BBB");
        assert!(events[0].worthiness >= events[1].worthiness);
        assert_eq!(events[0].sentiment, Sentiment::Bearish);
        assert_eq!(events[0].id, "AAA_20240304_1015");
    }

    #[tokio::test]
    async fn test_duplicate_within_cooldown_suppressed() {
        let feed = Arc::new(StaticFeed::new().with_move("AAA", -8.5, 3.2));
        let clock = ManualClock::new(start());
        let mut d = EventDetector::new(feed.clone(), cfg(&["AAA"]), Arc::new(clock.clone()));

        assert_eq!(d.detect_events().await.len(), 1);
        clock.advance(Duration::minutes(30));
        assert!(d.detect_events().await.is_empty());
        clock.advance(Duration::minutes(31));
        assert_eq!(d.detect_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_failure_degrades_to_neutral() {
        let feed = StaticFeed::new().with_move("AAA", 6.0, 3.0);
        let clock = ManualClock::new(start());
        let mut d = EventDetector::new(Arc::new(feed), cfg(&["AAA"]), Arc::new(clock));
        let events = d.detect_events().await;
        assert_eq!(events[0].sentiment, Sentiment::Neutral);
    }

    #[tokio::test]
    async fn test_sector_divergence_from_peers() {
        let feed = StaticFeed::new()
            .with_move("005930.KS", -8.0, 3.0)
            .with_move("000660.KS", -1.0, 1.0)
            .with_failure("006400.KS");
        let clock = ManualClock::new(start());
        let mut d = EventDetector::new(Arc::new(feed), cfg(&["005930.KS"]), Arc::new(clock));
        let events = d.detect_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].peer_changes.len(), 1);
        assert!(events[0].has_sector_divergence());
        let data = events[0].to_puzzle_data();
        assert!(data.sector_divergence);
        assert_eq!(data.time, "10:15");
        assert_eq!(events[0].to_map()["event_type"], "sharp_drop");
    }
}
