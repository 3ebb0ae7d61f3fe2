//! Template library: every display string the pipeline emits.
//!
//! The scoring code works in terms of bands, grades and lessons; this module
//! turns those into text. A JSON file can override any part of the standard
//! library (`#[serde(default)]` fills the rest).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::clue::ClueType;
use crate::hypothesis::{Grade, Lesson};
use crate::investigation::{ReliabilityBand, Recommendation};
use crate::puzzle::{FeedbackTier, PuzzleType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PuzzleTemplate {
    /// Placeholders: `{symbol}`, `{change}`.
    pub title_format: String,
    pub hidden_truths: Vec<String>,
    pub correct_hypotheses: Vec<String>,
}

/// Named market scenario. Matched when more than half of its conditions
/// appear in discovered clue content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub conditions: Vec<String>,
    /// Outcome label → probability, in draw order.
    pub outcomes: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplementaryPair {
    pub first: ClueType,
    pub second: ClueType,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub reliability_very: String,
    pub reliability_somewhat: String,
    pub reliability_confirm: String,
    pub reliability_cautious: String,
    pub related_hint: String,
    pub contradiction_warning: String,
    pub bonus_default: String,
    pub same_type_default: String,
    pub reliability_contrast: String,
    pub no_link: String,
    pub no_clues: String,
    pub no_pattern: String,
    pub contradiction_flag: String,
    pub rec_more_reliable: String,
    pub rec_unexplored: String,
    pub rec_financial: String,
    pub rec_ready: String,
    pub rec_keep_going: String,
    pub feedback_excellent: String,
    pub feedback_good: String,
    pub feedback_instructive: String,
    pub grade_excellent: String,
    pub grade_good: String,
    pub grade_mixed: String,
    pub grade_missed: String,
    pub lesson_used_clues: String,
    pub lesson_risk_reward: String,
    pub lesson_more_clues: String,
    pub lesson_overconfidence: String,
    pub lesson_alternatives: String,
    pub outcome_unknown: String,
    pub validation_report: String,
    pub puzzle_description: String,
    pub live_title: String,
    pub live_description: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            reliability_very: "Very reliable information.".into(),
            reliability_somewhat: "Somewhat reliable information.".into(),
            reliability_confirm: "This information needs confirmation.".into(),
            reliability_cautious: "Treat this information cautiously.".into(),
            related_hint: "This clue links to {count} other clue(s).".into(),
            contradiction_warning: "Some other evidence contradicts this clue.".into(),
            bonus_default: "Dig deeper before drawing conclusions.".into(),
            same_type_default: "Evidence of the same kind is consistent.".into(),
            reliability_contrast: "These clues differ sharply in reliability; weight the more reliable one.".into(),
            no_link: "No clear link between these two clues.".into(),
            no_clues: "Not enough clues yet.".into(),
            no_pattern: "Still looking for a pattern.".into(),
            contradiction_flag: "Conflicting evidence remains unresolved.".into(),
            rec_more_reliable: "Look for more reliable sources.".into(),
            rec_unexplored: "Much is still unexplored. Try investigating {channel}.".into(),
            rec_financial: "Check the financial data to verify the fundamentals.".into(),
            rec_ready: "You have investigated enough. Time to submit a hypothesis.".into(),
            rec_keep_going: "A few more clues should firm up your view.".into(),
            feedback_excellent: "Excellent analysis. The truth: {truth}. Your read beat the market.".into(),
            feedback_good: "Good analysis. The truth: {truth}. Right direction, but it needed deeper digging.".into(),
            feedback_instructive: "This one missed, but failure teaches. The truth: {truth}. Gather more clues next time.".into(),
            grade_excellent: "Excellent".into(),
            grade_good: "Good".into(),
            grade_mixed: "Mixed".into(),
            grade_missed: "Missed".into(),
            lesson_used_clues: "You used your clues well.".into(),
            lesson_risk_reward: "Your risk/reward sizing was sound.".into(),
            lesson_more_clues: "Gather more clues before committing.".into(),
            lesson_overconfidence: "Beware of overconfidence.".into(),
            lesson_alternatives: "Consider the market's other possibilities.".into(),
            outcome_unknown: "The market moved unexpectedly.".into(),
            validation_report: "{grade} analysis (accuracy {accuracy}%). Market outcome: {outcome}. Your prediction: {predicted}.".into(),
            puzzle_description: "{symbol} moved {change}% on {volume}x normal volume. Market: {sentiment}. What caused it?".into(),
            live_title: "Live: {name} {change}% mystery".into(),
            live_description: "[Live event] {name} moved {change}% on {volume}x normal volume. Market: {sentiment}. Detected at {time}. Severity: {severity}. Find the truth behind the move.".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentLibrary {
    pub templates: HashMap<PuzzleType, Vec<PuzzleTemplate>>,
    pub truth_hints: HashMap<String, String>,
    pub default_hint: String,
    pub noise_pool: Vec<String>,
    pub scenarios: Vec<Scenario>,
    pub outcome_descriptions: HashMap<String, String>,
    pub bonus_insights: HashMap<ClueType, String>,
    pub same_type_links: HashMap<ClueType, String>,
    pub complementary_pairs: Vec<ComplementaryPair>,
    pub type_summaries: HashMap<ClueType, String>,
    pub messages: Messages,
}

impl Default for ContentLibrary {
    fn default() -> Self {
        Self::standard()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ContentLibrary {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading content library {}", path.display()))?;
        let lib: ContentLibrary = serde_json::from_str(&raw)
            .with_context(|| format!("parsing content library {}", path.display()))?;
        Ok(lib)
    }

    pub fn standard() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            PuzzleType::PriceDrop,
            vec![PuzzleTemplate {
                title_format: "The secret of the {symbol} {change}% drop".into(),
                hidden_truths: strings(&[
                    "pre-earnings anxiety",
                    "sector-wide correction",
                    "major shareholder sale rumor",
                    "regulatory risk",
                    "technical oversold",
                ]),
                correct_hypotheses: strings(&[
                    "temporary oversold - buying opportunity",
                    "structural problem - further decline expected",
                    "sector rotation - wait and see",
                ]),
            }],
        );
        templates.insert(
            PuzzleType::PriceSurge,
            vec![PuzzleTemplate {
                title_format: "Why did {symbol} jump {change}%?".into(),
                hidden_truths: strings(&[
                    "M&A rumor",
                    "imminent product launch",
                    "expected earnings surprise",
                    "institutional accumulation",
                    "short covering",
                ]),
                correct_hypotheses: strings(&[
                    "sustained rise possible - add to position",
                    "overheated - take profits",
                    "volatile market - buy in tranches",
                ]),
            }],
        );
        templates.insert(
            PuzzleType::Mystery,
            vec![PuzzleTemplate {
                title_format: "Something is off with {symbol} ({change}%)".into(),
                hidden_truths: strings(&[
                    "program trading imbalance",
                    "index rebalancing flows",
                    "options expiry pinning",
                ]),
                correct_hypotheses: strings(&[
                    "mechanical flow - fades quickly, hold",
                    "noise without fundamentals - wait and see",
                ]),
            }],
        );

        let truth_hints: HashMap<String, String> = [
            ("pre-earnings anxiety", "Earnings due next week; worries the results miss consensus."),
            ("sector-wide correction", "Peers are falling too: sector-wide decline across the industry."),
            ("major shareholder sale rumor", "No filing on major shareholder stakes, yet a sale rumor is spreading."),
            ("regulatory risk", "Lawmakers scheduled a hearing on new rules for the industry."),
            ("technical oversold", "RSI < 30 and price broke below the lower Bollinger band."),
            ("M&A rumor", "Unusual block trades ahead of rumored acquisition talks."),
            ("imminent product launch", "Supplier orders spiked ahead of a launch event next month."),
            ("expected earnings surprise", "Channel checks point to margins well above consensus."),
            ("institutional accumulation", "Institutions net bought for five straight sessions with rising volume."),
            ("short covering", "Short interest fell sharply while the price gapped up."),
            ("program trading imbalance", "Program sell orders stacked at the close."),
            ("index rebalancing flows", "The stock's index weight changes at the next rebalance."),
            ("options expiry pinning", "Heavy open interest sits at the nearest strike ahead of expiry."),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let scenarios = vec![
            Scenario {
                name: "oversold_rebound".into(),
                conditions: strings(&["RSI < 30", "sector-wide decline", "solid fundamentals"]),
                outcomes: vec![
                    ("strong_bounce".into(), 0.3),
                    ("mild_bounce".into(), 0.5),
                    ("continued_decline".into(), 0.2),
                ],
            },
            Scenario {
                name: "momentum_continuation".into(),
                conditions: strings(&["uptrend", "rising volume", "positive news"]),
                outcomes: vec![
                    ("continued_rise".into(), 0.6),
                    ("consolidation".into(), 0.3),
                    ("reversal".into(), 0.1),
                ],
            },
            Scenario {
                name: "range_breakout".into(),
                conditions: strings(&["top of the range", "volume surge", "strong market"]),
                outcomes: vec![
                    ("breakout".into(), 0.4),
                    ("false_breakout".into(), 0.3),
                    ("continued_range".into(), 0.3),
                ],
            },
        ];

        let outcome_descriptions: HashMap<String, String> = [
            ("rise", "The price rose."),
            ("fall", "The price fell."),
            ("flat", "The price moved sideways."),
            ("strong_bounce", "A strong rebound followed."),
            ("mild_bounce", "A mild rebound followed."),
            ("continued_decline", "The decline continued."),
            ("continued_rise", "The uptrend continued."),
            ("consolidation", "The price entered consolidation."),
            ("reversal", "The trend reversed."),
            ("breakout", "The price broke out of its range."),
            ("false_breakout", "It was a false breakout."),
            ("continued_range", "The range held."),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let bonus_insights: HashMap<ClueType, String> = [
            (ClueType::News, "Compare when the article was written with the current market."),
            (ClueType::Financial, "Focus on the year-over-year change."),
            (ClueType::Chart, "Check how similar patterns played out before."),
            (ClueType::Insider, "Line up insider trade dates with the price moves."),
            (ClueType::Social, "Separate emotional reaction from fundamentals."),
            (ClueType::Analyst, "Track the history of target price changes."),
            (ClueType::Competitor, "Separate the sector trend from the company itself."),
            (ClueType::Macro, "Pin down how the macro indicator actually hits this company."),
        ]
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();

        let same_type_links: HashMap<ClueType, String> = [
            (ClueType::News, "Several news items together reveal the full picture."),
            (ClueType::Financial, "The trend in the financial data becomes clear."),
            (ClueType::Chart, "The pattern is confirmed."),
            (ClueType::Analyst, "A consensus view across analysts emerges."),
        ]
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();

        let complementary_pairs = vec![
            ComplementaryPair {
                first: ClueType::News,
                second: ClueType::Financial,
                message: "Matching news against the financials shows the real impact.".into(),
            },
            ComplementaryPair {
                first: ClueType::Chart,
                second: ClueType::Insider,
                message: "The chart pattern lines up with insider trading.".into(),
            },
            ComplementaryPair {
                first: ClueType::Macro,
                second: ClueType::Competitor,
                message: "The macro backdrop's effect on the whole sector becomes clear.".into(),
            },
            ComplementaryPair {
                first: ClueType::Analyst,
                second: ClueType::Social,
                message: "A gap opens between expert opinion and crowd sentiment.".into(),
            },
        ];

        let type_summaries: HashMap<ClueType, String> = [
            (ClueType::News, "News flow shows market psychology."),
            (ClueType::Financial, "Financial data backs the fundamentals."),
            (ClueType::Chart, "Technical signals are appearing."),
            (ClueType::Insider, "Insider activity hints at informed positioning."),
            (ClueType::Social, "Social chatter reflects retail sentiment."),
            (ClueType::Analyst, "Analyst views frame expectations."),
            (ClueType::Competitor, "Competitor moves give sector context."),
            (ClueType::Macro, "Macro indicators set the backdrop."),
        ]
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();

        Self {
            templates,
            truth_hints,
            default_hint: "No notable news.".into(),
            noise_pool: strings(&[
                "Analyst cut the target price.",
                "Foreign investors kept net selling.",
                "Institutions turned net buyers.",
                "Short interest balance increased.",
                "Program sell orders are queued.",
            ]),
            scenarios,
            outcome_descriptions,
            bonus_insights,
            same_type_links,
            complementary_pairs,
            type_summaries,
            messages: Messages::default(),
        }
    }

    /// Template for a puzzle type, falling back to the mystery template.
    pub fn templates_for(&self, puzzle_type: PuzzleType) -> &[PuzzleTemplate] {
        match self.templates.get(&puzzle_type) {
            Some(list) if !list.is_empty() => list,
            _ => self
                .templates
                .get(&PuzzleType::Mystery)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        }
    }

    pub fn hint_for(&self, hidden_truth: &str) -> &str {
        self.truth_hints
            .get(hidden_truth)
            .map(String::as_str)
            .unwrap_or(self.default_hint.as_str())
    }

    pub fn reliability_text(&self, band: ReliabilityBand) -> &str {
        match band {
            ReliabilityBand::VeryReliable => &self.messages.reliability_very,
            ReliabilityBand::SomewhatReliable => &self.messages.reliability_somewhat,
            ReliabilityBand::NeedsConfirmation => &self.messages.reliability_confirm,
            ReliabilityBand::TreatCautiously => &self.messages.reliability_cautious,
        }
    }

    pub fn bonus_insight(&self, clue_type: ClueType) -> &str {
        self.bonus_insights
            .get(&clue_type)
            .map(String::as_str)
            .unwrap_or(self.messages.bonus_default.as_str())
    }

    pub fn same_type_link(&self, clue_type: ClueType) -> &str {
        self.same_type_links
            .get(&clue_type)
            .map(String::as_str)
            .unwrap_or(self.messages.same_type_default.as_str())
    }

    /// Order-insensitive lookup of a complementary pair message.
    pub fn complementary(&self, a: ClueType, b: ClueType) -> Option<&str> {
        self.complementary_pairs
            .iter()
            .find(|p| (p.first == a && p.second == b) || (p.first == b && p.second == a))
            .map(|p| p.message.as_str())
    }

    pub fn recommendation_text(&self, rec: Recommendation) -> String {
        match rec {
            Recommendation::SeekReliableSources => self.messages.rec_more_reliable.clone(),
            Recommendation::ExploreChannel(channel) => {
                fill(&self.messages.rec_unexplored, &[("channel", channel.as_str().to_string())])
            }
            Recommendation::CheckFinancials => self.messages.rec_financial.clone(),
            Recommendation::SubmitHypothesis => self.messages.rec_ready.clone(),
            Recommendation::KeepInvestigating => self.messages.rec_keep_going.clone(),
        }
    }

    pub fn feedback_text(&self, tier: FeedbackTier, hidden_truth: &str) -> String {
        let template = match tier {
            FeedbackTier::Excellent => &self.messages.feedback_excellent,
            FeedbackTier::Good => &self.messages.feedback_good,
            FeedbackTier::Instructive => &self.messages.feedback_instructive,
        };
        fill(template, &[("truth", hidden_truth.to_string())])
    }

    pub fn grade_text(&self, grade: Grade) -> &str {
        match grade {
            Grade::Excellent => &self.messages.grade_excellent,
            Grade::Good => &self.messages.grade_good,
            Grade::Mixed => &self.messages.grade_mixed,
            Grade::Missed => &self.messages.grade_missed,
        }
    }

    pub fn lesson_text(&self, lesson: Lesson) -> &str {
        match lesson {
            Lesson::UsedCluesWell => &self.messages.lesson_used_clues,
            Lesson::SoundRiskReward => &self.messages.lesson_risk_reward,
            Lesson::GatherMoreClues => &self.messages.lesson_more_clues,
            Lesson::Overconfidence => &self.messages.lesson_overconfidence,
            Lesson::ConsiderAlternatives => &self.messages.lesson_alternatives,
        }
    }

    pub fn outcome_description(&self, outcome: &str) -> &str {
        self.outcome_descriptions
            .get(outcome)
            .map(String::as_str)
            .unwrap_or(self.messages.outcome_unknown.as_str())
    }
}

/// Replace `{key}` placeholders.
pub fn fill(template: &str, values: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_falls_back_to_mystery() {
        let lib = ContentLibrary::standard();
        let fallback = lib.templates_for(PuzzleType::Volatility);
        assert_eq!(fallback.len(), 1);
        assert!(fallback[0].title_format.contains("Something is off"));
    }

    #[test]
    fn test_every_standard_truth_has_a_hint() {
        let lib = ContentLibrary::standard();
        for templates in lib.templates.values() {
            for t in templates {
                for truth in &t.hidden_truths {
                    assert_ne!(lib.hint_for(truth), lib.default_hint, "missing hint for {}", truth);
                }
            }
        }
    }

    #[test]
    fn test_scenario_probabilities_sum_to_one() {
        let lib = ContentLibrary::standard();
        for s in &lib.scenarios {
            let total: f64 = s.outcomes.iter().map(|(_, p)| p).sum();
            assert!((total - 1.0).abs() < 1e-9, "{} sums to {}", s.name, total);
        }
    }

    #[test]
    fn test_complementary_lookup_is_symmetric() {
        let lib = ContentLibrary::standard();
        assert!(lib.complementary(ClueType::Financial, ClueType::News).is_some());
        assert_eq!(
            lib.complementary(ClueType::News, ClueType::Financial),
            lib.complementary(ClueType::Financial, ClueType::News)
        );
        assert!(lib.complementary(ClueType::News, ClueType::Macro).is_none());
    }

    #[test]
    fn test_partial_json_overrides_keep_defaults() {
        let lib: ContentLibrary =
            serde_json::from_str(r#"{"default_hint": "Nothing to see."}"#).unwrap();
        assert_eq!(lib.default_hint, "Nothing to see.");
        assert!(!lib.scenarios.is_empty());
        assert_eq!(lib.messages.grade_good, "Good");
    }

    #[test]
    fn test_fill_placeholders() {
        let s = fill("{a} and {b}", &[("a", "x".into()), ("b", "y".into())]);
        assert_eq!(s, "x and y");
    }
}
