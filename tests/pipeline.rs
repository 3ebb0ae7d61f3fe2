//! End-to-end: scripted market -> detection -> puzzle -> investigation ->
//! validation -> submission -> attempt statistics -> expiry and archive.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use riskwalk::clock::{ManualClock, SharedClock};
use riskwalk::config::{DetectorConfig, LifecycleConfig};
use riskwalk::content::ContentLibrary;
use riskwalk::detector::{EventDetector, EventType, Sentiment};
use riskwalk::error::PuzzleError;
use riskwalk::feed::memory::StaticFeed;
use riskwalk::hypothesis::{Hypothesis, HypothesisEngine, MarketContext};
use riskwalk::investigation::InvestigationLedger;
use riskwalk::lifecycle::{LifecycleManager, PuzzleStatus, SortKey};
use riskwalk::puzzle::{Difficulty, FeedbackTier, PuzzleFactory};
use riskwalk::storage::ArchiveStore;

struct Rig {
    clock: ManualClock,
    shared: SharedClock,
    content: Arc<ContentLibrary>,
    manager: LifecycleManager,
}

fn rig(feed: Arc<StaticFeed>, watchlist: &[&str]) -> Rig {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
    let shared: SharedClock = Arc::new(clock.clone());
    let content = Arc::new(ContentLibrary::standard());
    let detector_cfg = DetectorConfig {
        watchlist: watchlist.iter().map(|s| s.to_string()).collect(),
        ..DetectorConfig::default()
    };
    let detector = EventDetector::new(feed, detector_cfg, shared.clone());
    let factory = PuzzleFactory::new(content.clone(), shared.clone(), Some(42));
    let manager = LifecycleManager::new(LifecycleConfig::default(), detector, factory, shared.clone());
    Rig {
        clock,
        shared,
        content,
        manager,
    }
}

#[tokio::test]
async fn full_round_from_detection_to_archive() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_move("AAA", -8.0, 3.2)
            .with_move("BBB", 0.5, 1.0)
            .with_indices(&[("^KS11", -2.4)]),
    );
    let Rig {
        clock,
        shared,
        content,
        manager,
    } = rig(feed, &["AAA", "BBB"]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.db");
    let mut manager = manager.with_store(ArchiveStore::open(path.to_str().unwrap()).unwrap());

    // detection
    let ids = manager.detect_cycle().await;
    assert_eq!(ids.len(), 1);
    let puzzle_id = ids[0].clone();
    let live = manager.get_puzzle_by_id(&puzzle_id).unwrap().clone();
    assert_eq!(live.event.symbol, "AAA");
    assert_eq!(live.event.event_type, EventType::SharpDrop);
    assert_eq!(live.event.sentiment, Sentiment::Bearish);
    assert_eq!(live.puzzle.difficulty, Difficulty::Advanced);
    assert_eq!(live.puzzle.available_clues.len(), 7);
    assert_eq!(live.status, PuzzleStatus::Active);

    // investigation
    let mut ledger = InvestigationLedger::new(30, content.clone(), shared.clone());
    let start_energy = ledger.energy();
    let total_cost: u32 = live.puzzle.available_clues.iter().map(|c| c.cost_energy).sum();
    assert!(total_cost <= start_energy);
    for clue in &live.puzzle.available_clues {
        let r = manager.investigate_clue(&puzzle_id, &clue.id, &mut ledger, false).unwrap();
        assert_eq!(r.clue_id, clue.id);
    }
    assert_eq!(ledger.energy(), start_energy - total_cost);

    let first = live.puzzle.available_clues[0].id.clone();
    assert_eq!(
        manager.investigate_clue(&puzzle_id, &first, &mut ledger, false).unwrap_err(),
        PuzzleError::AlreadyDiscovered(first.clone())
    );
    assert_eq!(ledger.energy(), start_energy - total_cost);

    let lp = manager.get_puzzle_by_id(&puzzle_id).unwrap().clone();
    let discovered = lp.puzzle.discovered();
    assert_eq!(discovered.len(), 7);
    assert_eq!(ledger.synthesize_clues(&discovered).clue_count, 7);

    // validation
    let mut engine = HypothesisEngine::new(content.clone(), shared.clone(), Some(42), 50);
    let mut hypothesis = Hypothesis::new(
        "hyp_1",
        puzzle_id.clone(),
        "Selling pressure will continue as guidance disappoints",
        "price will fall",
    )
    .with_confidence(0.8)
    .with_supporting(lp.puzzle.discovered_clues.clone());
    let outcome = engine.validate_hypothesis(&mut hypothesis, MarketContext::from(&lp.puzzle.event_data), &discovered);
    assert!((0.0..=1.0).contains(&outcome.accuracy));
    assert!(hypothesis.is_validated());
    assert_eq!(engine.history_len(), 1);

    // submission
    let correct = lp.puzzle.correct_hypothesis.clone();
    let evidence = lp.puzzle.discovered_clues.clone();
    let submission = manager.submit_hypothesis(&puzzle_id, &correct, &evidence).unwrap();
    assert!((submission.accuracy - 0.8).abs() < 1e-9);
    assert_ne!(submission.tier, FeedbackTier::Instructive);
    assert_eq!(submission.hidden_truth, lp.puzzle.hidden_truth);

    manager.record_puzzle_attempt(&puzzle_id, submission.accuracy, true).unwrap();
    assert_eq!(manager.get_puzzle_by_id(&puzzle_id).unwrap().status, PuzzleStatus::Completed);
    assert!(manager.get_active_puzzles(SortKey::Freshness, 10).is_empty());

    // expiry and archive
    clock.advance(Duration::seconds(LifecycleConfig::default().puzzle_lifetime_secs + 1));
    let report = manager.cleanup().unwrap();
    assert_eq!(report.archived, 1);
    assert!(manager.get_puzzle_by_id(&puzzle_id).is_none());

    let archived = manager.store().unwrap().load_archived().unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].status, PuzzleStatus::Archived);
    assert_eq!(archived[0].completions, 1);
    assert!(archived[0].puzzle.is_solved);

    let stats = manager.get_statistics();
    assert_eq!(stats.total_puzzles, 1);
    assert_eq!(stats.archived_puzzles, 1);
    assert_eq!(stats.total_completions, 1);
    assert!(shared.now() > live.expires_at);
}

#[tokio::test]
async fn failing_symbol_does_not_block_others() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_move("AAA", 6.5, 2.8)
            .with_failure("BBB")
            .with_move("CCC", -4.0, 2.5),
    );
    let mut r = rig(feed.clone(), &["AAA", "BBB", "CCC"]);

    let ids = r.manager.detect_cycle().await;
    assert_eq!(ids.len(), 2);
    let symbols: Vec<String> = r
        .manager
        .get_active_puzzles(SortKey::Worthiness, 10)
        .into_iter()
        .map(|lp| lp.event.symbol)
        .collect();
    assert_eq!(symbols, vec!["AAA".to_string(), "CCC".to_string()]);

    // the recovered symbol is picked up on a later cycle
    r.clock.advance(Duration::minutes(10));
    feed.set_move("BBB", 9.0, 4.0);
    let ids = r.manager.detect_cycle().await;
    assert_eq!(ids.len(), 1);
    assert_eq!(r.manager.get_puzzle_by_id(&ids[0]).unwrap().event.symbol, "BBB");
    assert_eq!(r.manager.get_statistics().active_puzzles, 3);
}

#[tokio::test]
async fn validations_persist_to_archive() {
    let feed = Arc::new(StaticFeed::new().with_move("AAA", -8.0, 3.2));
    let r = rig(feed, &["AAA"]);
    let mut engine = HypothesisEngine::new(r.content.clone(), r.shared.clone(), Some(3), 2);
    for i in 0..3 {
        let mut h = Hypothesis::new(format!("hyp_{}", i), "puzzle_x", "shares will rise on buybacks", "rise");
        engine.validate_hypothesis(&mut h, MarketContext { sentiment: Sentiment::Bullish }, &[]);
    }
    assert_eq!(engine.history_len(), 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.db");
    let mut store = ArchiveStore::open(path.to_str().unwrap()).unwrap();
    assert_eq!(store.record_validations(engine.history()).unwrap(), 2);
    assert_eq!(store.validation_count().unwrap(), 2);
}
