//! Play one round against a scripted feed: detect, investigate, hypothesise,
//! validate, submit. Prints one JSON line per step.
//!
//! `ARCHIVE_PATH` persists the validation history; `RNG_SEED` fixes clue
//! layout and simulated outcomes.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::sync::Arc;

use riskwalk::clock::system_clock;
use riskwalk::config::Config;
use riskwalk::content::ContentLibrary;
use riskwalk::detector::EventDetector;
use riskwalk::feed::memory::StaticFeed;
use riskwalk::hypothesis::{Hypothesis, HypothesisEngine, MarketContext};
use riskwalk::investigation::InvestigationLedger;
use riskwalk::lifecycle::{LifecycleManager, SortKey};
use riskwalk::puzzle::{public_view, PuzzleFactory};
use riskwalk::storage::ArchiveStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let clock = system_clock();
    let content = Arc::new(ContentLibrary::standard());

    let feed = Arc::new(
        StaticFeed::new()
            .with_move("005930.KS", -8.0, 3.2)
            .with_move("000660.KS", -1.2, 1.1)
            .with_move("006400.KS", -0.8, 0.9)
            .with_move("035420.KS", 4.1, 2.4)
            .with_indices(&[("^KS11", -2.4)]),
    );
    let mut detector_cfg = cfg.detector.clone();
    detector_cfg.watchlist = ["005930.KS", "000660.KS", "006400.KS", "035420.KS"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let detector = EventDetector::new(feed, detector_cfg, clock.clone());
    let factory = PuzzleFactory::new(content.clone(), clock.clone(), cfg.rng_seed);
    let mut manager = LifecycleManager::new(cfg.lifecycle.clone(), detector, factory, clock.clone());

    manager.force_detection_cycle().await;
    let live = manager
        .get_active_puzzles(SortKey::Worthiness, 1)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("scripted feed produced no puzzle"))?;
    let puzzle_id = live.puzzle.id.clone();
    println!("{}", json!({"step": "puzzle", "puzzle": public_view(&live.puzzle)}));

    let mut ledger = InvestigationLedger::new(cfg.player_level.max(5), content.clone(), clock.clone());
    let mut clue_ids: Vec<String> = live.puzzle.available_clues.iter().map(|c| c.id.clone()).collect();
    clue_ids.sort_by_key(|id| live.puzzle.clue(id).map_or(u32::MAX, |c| c.cost_energy));
    for clue_id in &clue_ids {
        match manager.investigate_clue(&puzzle_id, clue_id, &mut ledger, false) {
            Ok(r) => println!(
                "{}",
                json!({
                    "step": "investigate",
                    "clue": r.clue_type.as_str(),
                    "content": r.content,
                    "reliability": r.reliability,
                    "energy_remaining": r.energy_remaining,
                })
            ),
            Err(e) => println!("{}", json!({"step": "investigate", "clue_id": clue_id, "error": e.to_string(), "code": e.code()})),
        }
    }

    let lp = manager
        .get_puzzle_by_id(&puzzle_id)
        .ok_or_else(|| anyhow!("puzzle {} vanished", puzzle_id))?;
    let discovered = lp.puzzle.discovered();
    let synthesis = ledger.synthesize_clues(&discovered);
    println!(
        "{}",
        json!({
            "step": "synthesize",
            "summary": synthesis.summary,
            "confidence": synthesis.confidence,
            "recommendation": synthesis.recommendation_text,
        })
    );

    let statement = "Weak guidance and foreign selling will keep the shares under pressure";
    let mut hypothesis = Hypothesis::new("hyp_offline", &puzzle_id, statement, "price will fall further")
        .with_confidence(0.7)
        .with_supporting(lp.puzzle.discovered_clues.clone())
        .with_risk(-5.0, 12.0);
    let mut engine = HypothesisEngine::new(content, clock, cfg.rng_seed, cfg.validation_history_cap);
    let validation = engine.validate_hypothesis(&mut hypothesis, MarketContext::from(&lp.puzzle.event_data), &discovered);
    println!(
        "{}",
        json!({
            "step": "validate",
            "accuracy": validation.accuracy,
            "outcome": validation.outcome,
            "degraded": validation.degradation().map(|e| e.to_string()),
            "feedback": validation.feedback,
            "risk_reward": hypothesis.risk_reward_ratio(),
        })
    );

    let evidence = lp.puzzle.discovered_clues.clone();
    let submission = manager.submit_hypothesis(&puzzle_id, statement, &evidence)?;
    manager.record_puzzle_attempt(&puzzle_id, submission.accuracy, true)?;
    println!(
        "{}",
        json!({
            "step": "submit",
            "accuracy": submission.accuracy,
            "feedback": submission.feedback,
            "hidden_truth": submission.hidden_truth,
        })
    );
    println!("{}", json!({"step": "stats", "stats": manager.get_statistics().to_json()}));

    if let Some(path) = &cfg.archive_path {
        let mut store = ArchiveStore::open(path)?;
        let n = store.record_validations(engine.history())?;
        println!("{}", json!({"step": "archive", "validations": n}));
    }
    Ok(())
}
