//! JSON-lines logging for the puzzle pipeline.
//!
//! `LOG_LEVEL` sets the minimum level (default info), `LOG_DOMAINS` limits
//! output to a comma list of domains (default all). Both are read once. With
//! `LOG_DIR` set, records are also appended under `LOG_DIR/<run_id>/`:
//! debug and trace to `trace.jsonl`, everything else to `events.jsonl`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    const ALL: [Level; 6] = [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error, Level::Fatal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let s = s.trim();
        Level::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,
    Detect,
    Puzzle,
    Investigate,
    Validate,
    Lifecycle,
    Storage,
    System,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Detect => "detect",
            Domain::Puzzle => "puzzle",
            Domain::Investigate => "investigate",
            Domain::Validate => "validate",
            Domain::Lifecycle => "lifecycle",
            Domain::Storage => "storage",
            Domain::System => "system",
        }
    }
}

/// Filters resolved from the environment on first use.
struct Filter {
    min: Level,
    /// `None` means every domain.
    domains: Option<HashSet<String>>,
}

impl Filter {
    fn parse(level: Option<&str>, domains: Option<&str>) -> Self {
        let min = level.and_then(|l| l.parse().ok()).unwrap_or(Level::Info);
        let domains = domains
            .filter(|d| d.trim() != "all")
            .map(|d| d.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect());
        Self { min, domains }
    }

    fn allows(&self, level: Level, domain: Domain) -> bool {
        level >= self.min && self.domains.as_ref().map_or(true, |set| set.contains(domain.as_str()))
    }
}

struct Sinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

impl Sinks {
    fn open(dir: &Path, run_id: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        fs::write(
            dir.join("manifest.json"),
            json!({"run_id": run_id, "started": ts_now(), "pid": std::process::id()}).to_string(),
        )?;
        let append = |name: &str| OpenOptions::new().create(true).append(true).open(dir.join(name));
        Ok(Self {
            events: Mutex::new(BufWriter::new(append("events.jsonl")?)),
            trace: Mutex::new(BufWriter::new(append("trace.jsonl")?)),
        })
    }

    fn write(&self, level: Level, line: &str) {
        let target = if level <= Level::Debug { &self.trace } else { &self.events };
        if let Ok(mut w) = target.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

struct Logger {
    run_id: String,
    filter: Filter,
    sinks: Option<Sinks>,
    seq: AtomicU64,
}

fn logger() -> &'static Logger {
    static LOGGER: OnceLock<Logger> = OnceLock::new();
    LOGGER.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("rw-{}-{}", Utc::now().timestamp_millis(), std::process::id()));
        let filter = Filter::parse(
            std::env::var("LOG_LEVEL").ok().as_deref(),
            std::env::var("LOG_DOMAINS").ok().as_deref(),
        );
        let sinks = std::env::var("LOG_DIR").ok().and_then(|base| {
            Sinks::open(&Path::new(&base).join(&run_id), &run_id)
                .map_err(|e| eprintln!("[log] file sinks disabled: {}", e))
                .ok()
        });
        Logger {
            run_id,
            filter,
            sinks,
            seq: AtomicU64::new(0),
        }
    })
}

/// RFC3339 timestamp with milliseconds.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Keys lifted out of `data` to the top level of a record.
const PROMOTED: [&str; 2] = ["symbol", "puzzle_id"];

fn render(run_id: &str, seq: u64, level: Level, domain: Domain, event: &str, mut data: Map<String, Value>) -> String {
    let msg = data.remove("msg").unwrap_or_else(|| Value::String(String::new()));
    let mut record = json!({
        "ts": ts_now(),
        "run_id": run_id,
        "seq": seq,
        "lvl": level.as_str().to_uppercase(),
        "component": domain.as_str(),
        "event": event,
        "msg": msg,
    });
    if let Value::Object(top) = &mut record {
        for key in PROMOTED {
            if let Some(v) = data.remove(key) {
                top.insert(key.to_string(), v);
            }
        }
        top.insert("data".to_string(), Value::Object(data));
    }
    record.to_string()
}

pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let lg = logger();
    if !lg.filter.allows(level, domain) {
        return;
    }
    let seq = lg.seq.fetch_add(1, Ordering::Relaxed);
    let line = render(&lg.run_id, seq, level, domain, event, fields);
    if let Some(sinks) = &lg.sinks {
        sinks.write(level, &line);
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_fetch_failure(symbol: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Market,
        "fetch_failed",
        obj(&[("symbol", v_str(symbol)), ("reason", v_str(reason))]),
    );
}

pub fn log_event_detected(symbol: &str, event_type: &str, change_pct: f64, volume_ratio: f64, worthiness: f64) {
    log(
        Level::Info,
        Domain::Detect,
        "event_detected",
        obj(&[
            ("symbol", v_str(symbol)),
            ("event_type", v_str(event_type)),
            ("change_pct", v_num(change_pct)),
            ("volume_ratio", v_num(volume_ratio)),
            ("worthiness", v_num(worthiness)),
        ]),
    );
}

pub fn log_puzzle_created(puzzle_id: &str, symbol: &str, difficulty: &str, clues: usize) {
    log(
        Level::Info,
        Domain::Puzzle,
        "puzzle_created",
        obj(&[
            ("puzzle_id", v_str(puzzle_id)),
            ("symbol", v_str(symbol)),
            ("difficulty", v_str(difficulty)),
            ("clues", json!(clues)),
        ]),
    );
}

pub fn log_investigation(clue_id: &str, clue_type: &str, success: bool, energy_spent: u32, energy_left: u32) {
    log(
        Level::Debug,
        Domain::Investigate,
        "investigate",
        obj(&[
            ("clue_id", v_str(clue_id)),
            ("clue_type", v_str(clue_type)),
            ("success", json!(success)),
            ("energy_spent", json!(energy_spent)),
            ("energy_left", json!(energy_left)),
        ]),
    );
}

pub fn log_validation(hypothesis_id: &str, accuracy: f64, outcome: &str, scenario: Option<&str>) {
    log(
        Level::Info,
        Domain::Validate,
        "hypothesis_validated",
        obj(&[
            ("hypothesis_id", v_str(hypothesis_id)),
            ("accuracy", v_num(accuracy)),
            ("outcome", v_str(outcome)),
            ("scenario", scenario.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_lifecycle_cycle(action: &str, fields: &[(&str, Value)]) {
    let mut data = obj(fields);
    data.insert("action".to_string(), v_str(action));
    log(Level::Info, Domain::Lifecycle, "cycle", data);
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}
