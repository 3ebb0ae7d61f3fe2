use std::collections::HashMap;
use std::str::FromStr;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[derive(Debug, Clone)]
pub struct Config {
    pub detector: DetectorConfig,
    pub lifecycle: LifecycleConfig,
    pub feed: FeedConfig,
    pub player_level: u32,
    pub validation_history_cap: usize,
    pub rng_seed: Option<u64>,
    pub archive_path: Option<String>,
    pub content_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            detector: DetectorConfig::from_env(),
            lifecycle: LifecycleConfig::from_env(),
            feed: FeedConfig::from_env(),
            player_level: env_or("PLAYER_LEVEL", 1),
            validation_history_cap: env_or("VALIDATION_HISTORY_CAP", 500),
            rng_seed: std::env::var("RNG_SEED").ok().and_then(|v| v.parse().ok()),
            archive_path: std::env::var("ARCHIVE_PATH").ok(),
            content_path: std::env::var("CONTENT_PATH").ok(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            lifecycle: LifecycleConfig::default(),
            feed: FeedConfig::default(),
            player_level: 1,
            validation_history_cap: 500,
            rng_seed: None,
            archive_path: None,
            content_path: None,
        }
    }
}

// =============================================================================
// Detector
// =============================================================================

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// |change %| at which a move counts as sharp.
    pub sharp_movement_pct: f64,
    /// Volume ratio at which volume counts as a spike.
    pub volume_multiplier: f64,
    /// Combined gate: both of these must hold for an event to be emitted.
    pub combined_move_pct: f64,
    pub combined_volume_mult: f64,
    /// Peer spread (percentage points) beyond which a move is divergent.
    pub divergence_pp: f64,
    /// Index move (%) that flips market sentiment away from neutral.
    pub sentiment_band_pct: f64,
    pub cooldown_secs: i64,
    pub retention_secs: i64,
    pub volume_history_days: usize,
    pub max_peers: usize,
    pub watchlist: Vec<String>,
    pub sector_peers: HashMap<String, Vec<String>>,
}

impl DetectorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            sharp_movement_pct: env_or("SHARP_MOVE_PCT", d.sharp_movement_pct),
            volume_multiplier: env_or("VOLUME_MULT", d.volume_multiplier),
            combined_move_pct: env_or("COMBINED_MOVE_PCT", d.combined_move_pct),
            combined_volume_mult: env_or("COMBINED_VOLUME_MULT", d.combined_volume_mult),
            divergence_pp: env_or("DIVERGENCE_PP", d.divergence_pp),
            sentiment_band_pct: env_or("SENTIMENT_BAND_PCT", d.sentiment_band_pct),
            cooldown_secs: env_or("EVENT_COOLDOWN_SECS", d.cooldown_secs),
            retention_secs: env_or("EVENT_RETENTION_SECS", d.retention_secs),
            volume_history_days: env_or("VOLUME_HISTORY_DAYS", d.volume_history_days),
            max_peers: env_or("MAX_PEERS", d.max_peers),
            watchlist: env_list("WATCHLIST").unwrap_or(d.watchlist),
            sector_peers: d.sector_peers,
        }
    }

    pub fn peers_of(&self, symbol: &str) -> &[String] {
        self.sector_peers.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sharp_movement_pct: 5.0,
            volume_multiplier: 2.5,
            combined_move_pct: 3.0,
            combined_volume_mult: 2.0,
            divergence_pp: 3.0,
            sentiment_band_pct: 2.0,
            cooldown_secs: 3600,
            retention_secs: 86_400,
            volume_history_days: 20,
            max_peers: 3,
            watchlist: default_watchlist(),
            sector_peers: default_sector_peers(),
        }
    }
}

fn default_watchlist() -> Vec<String> {
    [
        // large caps
        "005930.KS", "000660.KS", "035420.KS", "051910.KS", "006400.KS",
        "207940.KS", "005380.KS", "000270.KS", "068270.KS", "003670.KS",
        // mid caps, higher volatility
        "035720.KS", "096770.KS", "034730.KS", "017670.KS", "030200.KS",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sector_peers() -> HashMap<String, Vec<String>> {
    let pairs: [(&str, &[&str]); 8] = [
        // semiconductors
        ("005930.KS", &["000660.KS", "006400.KS"]),
        ("000660.KS", &["005930.KS", "006400.KS"]),
        // internet
        ("035420.KS", &["035720.KS"]),
        ("035720.KS", &["035420.KS"]),
        // autos
        ("005380.KS", &["000270.KS"]),
        ("000270.KS", &["005380.KS"]),
        // bio
        ("068270.KS", &["207940.KS"]),
        ("207940.KS", &["068270.KS"]),
    ];
    pairs
        .iter()
        .map(|(sym, peers)| (sym.to_string(), peers.iter().map(|p| p.to_string()).collect()))
        .collect()
}

// =============================================================================
// Lifecycle
// =============================================================================

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub max_active_puzzles: usize,
    pub detection_interval_secs: i64,
    pub puzzle_lifetime_secs: i64,
    pub min_event_worthiness: f64,
    pub cleanup_interval_secs: i64,
    pub poll_tick_secs: u64,
    pub error_backoff_secs: u64,
    pub retired_capacity: usize,
}

impl LifecycleConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_active_puzzles: env_or("MAX_ACTIVE_PUZZLES", d.max_active_puzzles),
            detection_interval_secs: env_or("DETECTION_INTERVAL_SECS", d.detection_interval_secs),
            puzzle_lifetime_secs: env_or("PUZZLE_LIFETIME_SECS", d.puzzle_lifetime_secs),
            min_event_worthiness: env_or("MIN_EVENT_WORTHINESS", d.min_event_worthiness),
            cleanup_interval_secs: env_or("CLEANUP_INTERVAL_SECS", d.cleanup_interval_secs),
            poll_tick_secs: env_or("POLL_TICK_SECS", d.poll_tick_secs),
            error_backoff_secs: env_or("ERROR_BACKOFF_SECS", d.error_backoff_secs),
            retired_capacity: env_or("RETIRED_CAPACITY", d.retired_capacity),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_active_puzzles: 10,
            detection_interval_secs: 300,
            puzzle_lifetime_secs: 6 * 3600,
            min_event_worthiness: 0.3,
            cleanup_interval_secs: 1800,
            poll_tick_secs: 30,
            error_backoff_secs: 60,
            retired_capacity: 200,
        }
    }
}

// =============================================================================
// Feed
// =============================================================================

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub base_url: String,
    /// Index symbols used to derive market sentiment.
    pub index_symbols: Vec<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: std::env::var("QUOTE_BASE_URL").unwrap_or(d.base_url),
            index_symbols: env_list("INDEX_SYMBOLS").unwrap_or(d.index_symbols),
            timeout_secs: env_or("FEED_TIMEOUT_SECS", d.timeout_secs),
            max_retries: env_or("FEED_MAX_RETRIES", d.max_retries),
            retry_base_delay_ms: env_or("FEED_RETRY_BASE_MS", d.retry_base_delay_ms),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            index_symbols: vec!["^KS11".to_string(), "^KQ11".to_string()],
            timeout_secs: 10,
            max_retries: 2,
            retry_base_delay_ms: 200,
        }
    }
}
