use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use riskwalk::clock::system_clock;
use riskwalk::config::Config;
use riskwalk::content::ContentLibrary;
use riskwalk::detector::EventDetector;
use riskwalk::feed::http::HttpQuoteFeed;
use riskwalk::lifecycle::{LifecycleManager, LifecycleService};
use riskwalk::logging::{log, obj, v_num, v_str, Domain, Level};
use riskwalk::puzzle::PuzzleFactory;
use riskwalk::storage::ArchiveStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let clock = system_clock();

    let content = match &cfg.content_path {
        Some(path) => ContentLibrary::from_json_file(path)?,
        None => ContentLibrary::standard(),
    };
    let content = Arc::new(content);

    let feed = Arc::new(HttpQuoteFeed::new(&cfg.feed)?);
    let detector = EventDetector::new(feed, cfg.detector.clone(), clock.clone());
    let factory = PuzzleFactory::new(content, clock.clone(), cfg.rng_seed);
    let mut manager = LifecycleManager::new(cfg.lifecycle.clone(), detector, factory, clock);
    if let Some(path) = &cfg.archive_path {
        manager = manager.with_store(ArchiveStore::open(path)?);
    }

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("watchlist", v_num(cfg.detector.watchlist.len() as f64)),
            ("max_active", v_num(cfg.lifecycle.max_active_puzzles as f64)),
            ("feed", v_str(&cfg.feed.base_url)),
            ("archive", cfg.archive_path.as_deref().map(v_str).unwrap_or(Value::Null)),
        ]),
    );

    let mut service = LifecycleService::new(manager);
    service.start();

    let mut status = interval(Duration::from_secs(cfg.lifecycle.detection_interval_secs.max(1) as u64));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                let snap = service.snapshot();
                let mut fields = obj(&[("active", v_num(snap.active.len() as f64))]);
                fields.insert("stats".to_string(), snap.stats.to_json());
                log(Level::Info, Domain::Lifecycle, "status", fields);
            }
        }
    }

    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    service.stop().await?;
    Ok(())
}
