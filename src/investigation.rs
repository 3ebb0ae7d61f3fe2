//! Clue economy: an investigator session spends energy to reveal clues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::clue::{Clue, ClueType};
use crate::content::{fill, ContentLibrary};
use crate::error::PuzzleError;
use crate::logging::log_investigation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityBand {
    VeryReliable,
    SomewhatReliable,
    NeedsConfirmation,
    TreatCautiously,
}

impl ReliabilityBand {
    pub fn of(reliability: f64) -> Self {
        if reliability > 0.8 {
            ReliabilityBand::VeryReliable
        } else if reliability > 0.6 {
            ReliabilityBand::SomewhatReliable
        } else if reliability > 0.4 {
            ReliabilityBand::NeedsConfirmation
        } else {
            ReliabilityBand::TreatCautiously
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    SeekReliableSources,
    ExploreChannel(ClueType),
    CheckFinancials,
    SubmitHypothesis,
    KeepInvestigating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    SameType,
    Complementary,
    ReliabilityContrast,
    NoLink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub kind: ConnectionKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationResult {
    pub clue_id: String,
    pub clue_type: ClueType,
    pub content: String,
    pub reliability: f64,
    pub band: ReliabilityBand,
    pub insight: String,
    pub bonus_insight: Option<String>,
    pub related_hint: Option<String>,
    pub contradiction_warning: Option<String>,
    pub energy_spent: u32,
    pub energy_remaining: u32,
    pub time_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationRecord {
    pub at: DateTime<Utc>,
    pub clue_id: String,
    pub clue_type: ClueType,
    pub energy_spent: u32,
    pub time_secs: f64,
    pub reliability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub summary: String,
    /// Mean reliability of the discovered clues.
    pub confidence: f64,
    pub clue_count: usize,
    /// Distinct channels seen over all channels.
    pub coverage: f64,
    pub has_contradiction: bool,
    pub recommendation: Recommendation,
    pub recommendation_text: String,
}

#[derive(Clone)]
pub struct InvestigationLedger {
    level: u32,
    max_energy: u32,
    energy: u32,
    speed: f64,
    unlocked: BTreeSet<ClueType>,
    history: Vec<InvestigationRecord>,
    content: Arc<ContentLibrary>,
    clock: SharedClock,
}

impl InvestigationLedger {
    pub fn new(level: u32, content: Arc<ContentLibrary>, clock: SharedClock) -> Self {
        let max_energy = 10 + (level / 5) * 2;
        let unlocked = ClueType::ALL
            .iter()
            .copied()
            .filter(|t| t.unlock_level() <= level)
            .collect();
        Self {
            level,
            max_energy,
            energy: max_energy,
            speed: 1.0 + level as f64 * 0.1,
            unlocked,
            history: Vec::new(),
            content,
            clock,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn energy(&self) -> u32 {
        self.energy
    }

    pub fn max_energy(&self) -> u32 {
        self.max_energy
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_unlocked(&self, clue_type: ClueType) -> bool {
        self.unlocked.contains(&clue_type)
    }

    pub fn unlocked_tools(&self) -> Vec<ClueType> {
        self.unlocked.iter().copied().collect()
    }

    pub fn history(&self) -> &[InvestigationRecord] {
        &self.history
    }

    /// Reveal a clue. Every rejection leaves the ledger and the clue untouched.
    pub fn investigate(&mut self, clue: &mut Clue, use_boost: bool) -> Result<InvestigationResult, PuzzleError> {
        if !self.is_unlocked(clue.clue_type) {
            log_investigation(&clue.id, clue.clue_type.as_str(), false, 0, self.energy);
            return Err(PuzzleError::ToolLocked(clue.clue_type));
        }
        if clue.is_discovered {
            return Err(PuzzleError::AlreadyDiscovered(clue.id.clone()));
        }

        let cost = if use_boost { clue.cost_energy * 2 } else { clue.cost_energy };
        if self.energy < cost {
            log_investigation(&clue.id, clue.clue_type.as_str(), false, 0, self.energy);
            return Err(PuzzleError::InsufficientEnergy {
                required: cost,
                available: self.energy,
            });
        }

        self.energy -= cost;
        let mut time_secs = clue.cost_time as f64 / self.speed;
        if use_boost {
            time_secs /= 2.0;
        }
        let now = self.clock.now();
        clue.mark_discovered(now);

        let band = ReliabilityBand::of(clue.reliability);
        let result = InvestigationResult {
            clue_id: clue.id.clone(),
            clue_type: clue.clue_type,
            content: clue.content.clone(),
            reliability: clue.reliability,
            band,
            insight: self.content.reliability_text(band).to_string(),
            bonus_insight: use_boost.then(|| self.content.bonus_insight(clue.clue_type).to_string()),
            related_hint: (!clue.related_clues.is_empty()).then(|| {
                fill(
                    &self.content.messages.related_hint,
                    &[("count", clue.related_clues.len().to_string())],
                )
            }),
            contradiction_warning: (!clue.contradicts.is_empty())
                .then(|| self.content.messages.contradiction_warning.clone()),
            energy_spent: cost,
            energy_remaining: self.energy,
            time_secs,
        };

        self.history.push(InvestigationRecord {
            at: now,
            clue_id: clue.id.clone(),
            clue_type: clue.clue_type,
            energy_spent: cost,
            time_secs,
            reliability: clue.reliability,
        });
        log_investigation(&clue.id, clue.clue_type.as_str(), true, cost, self.energy);

        Ok(result)
    }

    /// Look for a link between two discovered clues.
    pub fn connect_clues(&self, a: &Clue, b: &Clue) -> Result<Connection, PuzzleError> {
        for clue in [a, b] {
            if !clue.is_discovered {
                return Err(PuzzleError::ClueNotFound(clue.id.clone()));
            }
        }

        let (kind, message) = if a.clue_type == b.clue_type {
            (ConnectionKind::SameType, self.content.same_type_link(a.clue_type).to_string())
        } else if let Some(msg) = self.content.complementary(a.clue_type, b.clue_type) {
            (ConnectionKind::Complementary, msg.to_string())
        } else if (a.reliability > 0.7 && b.reliability < 0.4) || (b.reliability > 0.7 && a.reliability < 0.4) {
            (
                ConnectionKind::ReliabilityContrast,
                self.content.messages.reliability_contrast.clone(),
            )
        } else {
            (ConnectionKind::NoLink, self.content.messages.no_link.clone())
        };
        Ok(Connection { kind, message })
    }

    pub fn synthesize_clues(&self, discovered: &[&Clue]) -> Synthesis {
        if discovered.is_empty() {
            let recommendation = Recommendation::SeekReliableSources;
            return Synthesis {
                summary: self.content.messages.no_clues.clone(),
                confidence: 0.0,
                clue_count: 0,
                coverage: 0.0,
                has_contradiction: false,
                recommendation,
                recommendation_text: self.content.recommendation_text(recommendation),
            };
        }

        let confidence = discovered.iter().map(|c| c.reliability).sum::<f64>() / discovered.len() as f64;

        let mut by_type: BTreeMap<ClueType, usize> = BTreeMap::new();
        for clue in discovered {
            *by_type.entry(clue.clue_type).or_default() += 1;
        }

        let mut parts: Vec<String> = by_type
            .keys()
            .filter_map(|t| self.content.type_summaries.get(t).cloned())
            .collect();

        let has_contradiction = discovered.iter().any(|c| {
            c.contradicts
                .iter()
                .any(|other| discovered.iter().any(|d| &d.id == other))
        });
        if has_contradiction {
            parts.push(self.content.messages.contradiction_flag.clone());
        }

        let summary = if parts.is_empty() {
            self.content.messages.no_pattern.clone()
        } else {
            parts.join(" ")
        };

        let recommendation = recommend(&by_type, confidence);
        Synthesis {
            summary,
            confidence,
            clue_count: discovered.len(),
            coverage: by_type.len() as f64 / ClueType::ALL.len() as f64,
            has_contradiction,
            recommendation,
            recommendation_text: self.content.recommendation_text(recommendation),
        }
    }
}

fn recommend(by_type: &BTreeMap<ClueType, usize>, confidence: f64) -> Recommendation {
    let missing: Vec<ClueType> = ClueType::ALL
        .iter()
        .copied()
        .filter(|t| !by_type.contains_key(t))
        .collect();

    if confidence < 0.5 {
        Recommendation::SeekReliableSources
    } else if missing.len() >= 4 {
        Recommendation::ExploreChannel(missing[0])
    } else if !by_type.contains_key(&ClueType::Financial) {
        Recommendation::CheckFinancials
    } else if by_type.len() >= 5 {
        Recommendation::SubmitHypothesis
    } else {
        Recommendation::KeepInvestigating
    }
}
