//! Puzzle model and factory.
//!
//! A puzzle hides one truth behind a shuffled set of clues: exactly one
//! signal clue carries the hint for the hidden truth, the rest are noise
//! drawn from a wider, lower reliability band.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::clue::{Clue, ClueType};
use crate::content::{fill, ContentLibrary, PuzzleTemplate};
use crate::detector::{MarketEvent, Severity};
use crate::error::PuzzleError;
use crate::investigation::{InvestigationLedger, InvestigationResult};
use crate::logging::log_puzzle_created;
use crate::random::rng_from_seed;

pub const SIGNAL_TIME_COST: u32 = 10;
pub const SIGNAL_ENERGY_COST: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PuzzleType {
    PriceDrop,
    PriceSurge,
    Volatility,
    Divergence,
    Mystery,
}

impl PuzzleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PuzzleType::PriceDrop => "price_drop",
            PuzzleType::PriceSurge => "price_surge",
            PuzzleType::Volatility => "volatility",
            PuzzleType::Divergence => "divergence",
            PuzzleType::Mystery => "mystery",
        }
    }

    pub fn from_payload(data: &PuzzleData) -> Self {
        if data.change_percent < -5.0 {
            PuzzleType::PriceDrop
        } else if data.change_percent > 5.0 {
            PuzzleType::PriceSurge
        } else if data.volatility.unwrap_or(0.0) > 30.0 {
            PuzzleType::Volatility
        } else if data.sector_divergence {
            PuzzleType::Divergence
        } else {
            PuzzleType::Mystery
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Master,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Beginner,
        Difficulty::Intermediate,
        Difficulty::Advanced,
        Difficulty::Master,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Master => "master",
        }
    }

    pub fn clue_count(&self) -> usize {
        match self {
            Difficulty::Beginner => 3,
            Difficulty::Intermediate => 5,
            Difficulty::Advanced => 7,
            Difficulty::Master => 10,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            Difficulty::Beginner => 1,
            Difficulty::Intermediate => 2,
            Difficulty::Advanced => 3,
            Difficulty::Master => 4,
        }
    }

    pub fn signal_reliability(&self) -> f64 {
        match self {
            Difficulty::Beginner => 0.9,
            _ => 0.7,
        }
    }

    pub fn reward_multiplier(&self) -> f64 {
        match self {
            Difficulty::Beginner => 1.0,
            Difficulty::Intermediate => 1.5,
            Difficulty::Advanced => 2.0,
            Difficulty::Master => 3.0,
        }
    }

    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Difficulty::Master,
            Severity::High => Difficulty::Advanced,
            Severity::Medium => Difficulty::Intermediate,
            Severity::Low => Difficulty::Beginner,
        }
    }
}

/// Flat event payload carried by a puzzle and handed to presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuzzleData {
    pub symbol: String,
    pub name: String,
    pub change_percent: f64,
    pub volume_ratio: f64,
    pub market_sentiment: String,
    pub time: String,
    pub sector_divergence: bool,
    pub event_type: String,
    pub severity: String,
    pub volatility: Option<f64>,
}

impl PuzzleData {
    /// Minimal payload for puzzles not sourced from a detected event.
    pub fn manual(symbol: &str, change_percent: f64, volume_ratio: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            change_percent,
            volume_ratio,
            market_sentiment: "neutral".to_string(),
            time: "intraday".to_string(),
            sector_divergence: false,
            event_type: "manual".to_string(),
            severity: "medium".to_string(),
            volatility: None,
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: String,
    pub title: String,
    pub description: String,
    pub puzzle_type: PuzzleType,
    pub difficulty: Difficulty,
    pub target_symbol: String,
    pub event_data: PuzzleData,
    pub hidden_truth: String,
    pub correct_hypothesis: String,
    pub available_clues: Vec<Clue>,
    /// Ids of discovered clues, in discovery order.
    pub discovered_clues: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub base_reward_xp: u32,
    pub is_solved: bool,
    pub solve_time_secs: Option<f64>,
    pub submitted_hypothesis: Option<String>,
}

impl Puzzle {
    pub fn clue(&self, clue_id: &str) -> Option<&Clue> {
        self.available_clues.iter().find(|c| c.id == clue_id)
    }

    pub fn discovered(&self) -> Vec<&Clue> {
        self.discovered_clues
            .iter()
            .filter_map(|id| self.clue(id))
            .collect()
    }

    /// Reveal one of this puzzle's clues through an investigator's ledger.
    pub fn investigate_clue(
        &mut self,
        clue_id: &str,
        ledger: &mut InvestigationLedger,
        use_boost: bool,
    ) -> Result<InvestigationResult, PuzzleError> {
        let clue = self
            .available_clues
            .iter_mut()
            .find(|c| c.id == clue_id)
            .ok_or_else(|| PuzzleError::ClueNotFound(clue_id.to_string()))?;
        let result = ledger.investigate(clue, use_boost)?;
        self.discovered_clues.push(clue_id.to_string());
        Ok(result)
    }

    /// Score a free-text answer against the canonical hypothesis and mark
    /// the puzzle solved.
    pub fn submit(
        &mut self,
        statement: &str,
        evidence: &[String],
        now: DateTime<Utc>,
        content: &ContentLibrary,
    ) -> Submission {
        let accuracy = keyword_accuracy(statement, &self.correct_hypothesis, evidence.len(), &self.discovered());
        let tier = FeedbackTier::from_accuracy(accuracy);

        self.is_solved = true;
        self.submitted_hypothesis = Some(statement.to_string());
        self.solve_time_secs = Some((now - self.created_at).num_milliseconds() as f64 / 1000.0);

        Submission {
            accuracy,
            tier,
            feedback: content.feedback_text(tier, &self.hidden_truth),
            hidden_truth: self.hidden_truth.clone(),
        }
    }

    /// XP and skill tier for a solve.
    pub fn calculate_reward(&self, time_taken_secs: f64, accuracy: f64) -> Reward {
        let accuracy = accuracy.clamp(0.0, 1.0);
        let mut xp = self.base_reward_xp as f64 * (1.0 + accuracy);
        if time_taken_secs < 60.0 {
            xp *= 2.0;
        }
        xp *= self.difficulty.reward_multiplier();
        Reward {
            xp: xp as u32,
            skill: SkillTier::from_accuracy(accuracy),
            puzzle_type: self.puzzle_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillTier {
    Master,
    Skilled,
    Novice,
    Experience,
}

impl SkillTier {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 0.9 {
            SkillTier::Master
        } else if accuracy >= 0.7 {
            SkillTier::Skilled
        } else if accuracy >= 0.5 {
            SkillTier::Novice
        } else {
            SkillTier::Experience
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub xp: u32,
    pub skill: SkillTier,
    pub puzzle_type: PuzzleType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackTier {
    Excellent,
    Good,
    Instructive,
}

impl FeedbackTier {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 0.8 {
            FeedbackTier::Excellent
        } else if accuracy >= 0.5 {
            FeedbackTier::Good
        } else {
            FeedbackTier::Instructive
        }
    }
}

/// Result of a quick keyword-overlap scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub accuracy: f64,
    pub tier: FeedbackTier,
    pub feedback: String,
    pub hidden_truth: String,
}

/// Keyword overlap (0.5), evidence count (up to 0.3), one clue above 0.7
/// reliability discovered (0.2).
pub fn keyword_accuracy(statement: &str, correct: &str, evidence_len: usize, discovered: &[&Clue]) -> f64 {
    let mut score = 0.0;

    let submitted: std::collections::HashSet<String> =
        statement.to_lowercase().split_whitespace().map(str::to_string).collect();
    let expected: std::collections::HashSet<String> =
        correct.to_lowercase().split_whitespace().map(str::to_string).collect();
    if submitted.intersection(&expected).next().is_some() {
        score += 0.5;
    }

    score += (evidence_len as f64 * 0.1).min(0.3);

    if discovered.iter().any(|c| c.reliability > 0.7) {
        score += 0.2;
    }

    score.min(1.0)
}

pub struct PuzzleFactory {
    content: Arc<ContentLibrary>,
    clock: SharedClock,
    rng: StdRng,
    puzzles: HashMap<String, Puzzle>,
}

impl PuzzleFactory {
    pub fn new(content: Arc<ContentLibrary>, clock: SharedClock, seed: Option<u64>) -> Self {
        Self {
            content,
            clock,
            rng: rng_from_seed(seed),
            puzzles: HashMap::new(),
        }
    }

    pub fn content(&self) -> &ContentLibrary {
        &self.content
    }

    pub fn get(&self, puzzle_id: &str) -> Option<&Puzzle> {
        self.puzzles.get(puzzle_id)
    }

    pub fn get_mut(&mut self, puzzle_id: &str) -> Option<&mut Puzzle> {
        self.puzzles.get_mut(puzzle_id)
    }

    pub fn remove(&mut self, puzzle_id: &str) -> Option<Puzzle> {
        self.puzzles.remove(puzzle_id)
    }

    pub fn len(&self) -> usize {
        self.puzzles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puzzles.is_empty()
    }

    pub fn create_puzzle(&mut self, symbol: &str, event: PuzzleData, difficulty: Difficulty) -> Puzzle {
        let puzzle_type = PuzzleType::from_payload(&event);
        let template = self.pick_template(puzzle_type);

        let hidden_truth = template
            .hidden_truths
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| self.content.default_hint.clone());
        let correct_hypothesis = template
            .correct_hypotheses
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_default();

        let change = format!("{:+.1}", event.change_percent);
        let title = fill(&template.title_format, &[("symbol", symbol.to_string()), ("change", change.clone())]);
        let description = fill(
            &self.content.messages.puzzle_description,
            &[
                ("symbol", symbol.to_string()),
                ("change", change),
                ("volume", format!("{:.1}", event.volume_ratio)),
                ("sentiment", event.market_sentiment.clone()),
            ],
        );

        let now = self.clock.now();
        let available_clues = self.generate_clues(&hidden_truth, difficulty);
        let puzzle = Puzzle {
            id: format!("puzzle_{}_{}_{:04x}", symbol, now.timestamp_millis(), self.rng.gen::<u16>()),
            title,
            description,
            puzzle_type,
            difficulty,
            target_symbol: symbol.to_string(),
            event_data: event,
            hidden_truth,
            correct_hypothesis,
            available_clues,
            discovered_clues: Vec::new(),
            created_at: now,
            base_reward_xp: 100,
            is_solved: false,
            solve_time_secs: None,
            submitted_hypothesis: None,
        };

        log_puzzle_created(&puzzle.id, symbol, difficulty.as_str(), puzzle.available_clues.len());
        self.puzzles.insert(puzzle.id.clone(), puzzle.clone());
        puzzle
    }

    /// Build a puzzle for a detected event, scaling difficulty by severity.
    pub fn create_puzzle_from_event(&mut self, event: &MarketEvent) -> Puzzle {
        let difficulty = Difficulty::from_severity(event.severity);
        let mut puzzle = self.create_puzzle(&event.symbol, event.to_puzzle_data(), difficulty);

        let change = format!("{:+.1}", event.change_percent);
        puzzle.title = fill(
            &self.content.messages.live_title,
            &[("name", event.name.clone()), ("change", change.clone())],
        );
        puzzle.description = fill(
            &self.content.messages.live_description,
            &[
                ("name", event.name.clone()),
                ("change", change),
                ("volume", format!("{:.1}", event.volume_ratio)),
                ("sentiment", event.sentiment.as_str().to_string()),
                ("time", event.detected_at.format("%H:%M:%S").to_string()),
                ("severity", event.severity.as_str().to_uppercase()),
            ],
        );
        self.puzzles.insert(puzzle.id.clone(), puzzle.clone());
        puzzle
    }

    fn pick_template(&mut self, puzzle_type: PuzzleType) -> PuzzleTemplate {
        self.content
            .templates_for(puzzle_type)
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| PuzzleTemplate {
                title_format: "{symbol} {change}% mystery".to_string(),
                hidden_truths: Vec::new(),
                correct_hypotheses: Vec::new(),
            })
    }

    fn generate_clues(&mut self, hidden_truth: &str, difficulty: Difficulty) -> Vec<Clue> {
        let count = difficulty.clue_count();
        let mut clues = Vec::with_capacity(count);

        clues.push(Clue::new(
            crate::random::short_id(&mut self.rng, "clue"),
            ClueType::News,
            self.content.hint_for(hidden_truth),
            difficulty.signal_reliability(),
            SIGNAL_ENERGY_COST,
            SIGNAL_TIME_COST,
        ));

        for _ in 1..count {
            let clue = self.noise_clue();
            clues.push(clue);
        }

        clues.shuffle(&mut self.rng);
        clues
    }

    fn noise_clue(&mut self) -> Clue {
        let clue_type = *ClueType::ALL.choose(&mut self.rng).unwrap_or(&ClueType::News);
        let content = self.content.noise_pool.choose(&mut self.rng).cloned().unwrap_or_default();
        Clue::new(
            crate::random::short_id(&mut self.rng, "clue"),
            clue_type,
            content,
            self.rng.gen_range(0.3..=0.6),
            self.rng.gen_range(1..=3),
            self.rng.gen_range(5..=15),
        )
    }

    pub fn submit_hypothesis(
        &mut self,
        puzzle_id: &str,
        statement: &str,
        evidence: &[String],
    ) -> Result<Submission, PuzzleError> {
        let now = self.clock.now();
        let puzzle = self
            .puzzles
            .get_mut(puzzle_id)
            .ok_or_else(|| PuzzleError::PuzzleNotFound(puzzle_id.to_string()))?;
        Ok(puzzle.submit(statement, evidence, now, &self.content))
    }
}

/// Presentation adapter for a puzzle without its hidden fields.
pub fn public_view(puzzle: &Puzzle) -> Value {
    json!({
        "id": puzzle.id,
        "title": puzzle.title,
        "description": puzzle.description,
        "puzzle_type": puzzle.puzzle_type.as_str(),
        "difficulty": puzzle.difficulty.as_str(),
        "symbol": puzzle.target_symbol,
        "event": puzzle.event_data.to_map(),
        "clues": puzzle.available_clues.len(),
        "discovered": puzzle.discovered_clues.len(),
        "is_solved": puzzle.is_solved,
    })
}
