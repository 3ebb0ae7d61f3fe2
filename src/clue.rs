//! Discoverable evidence attached to a puzzle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Evidence channel. Each channel needs its own investigation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClueType {
    News,
    Financial,
    Chart,
    Insider,
    Social,
    Analyst,
    Competitor,
    Macro,
}

impl ClueType {
    pub const ALL: [ClueType; 8] = [
        ClueType::News,
        ClueType::Financial,
        ClueType::Chart,
        ClueType::Insider,
        ClueType::Social,
        ClueType::Analyst,
        ClueType::Competitor,
        ClueType::Macro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClueType::News => "news",
            ClueType::Financial => "financial",
            ClueType::Chart => "chart",
            ClueType::Insider => "insider",
            ClueType::Social => "social",
            ClueType::Analyst => "analyst",
            ClueType::Competitor => "competitor",
            ClueType::Macro => "macro",
        }
    }

    /// Investigator level at which the tool for this channel unlocks.
    pub fn unlock_level(&self) -> u32 {
        match self {
            ClueType::News => 0,
            ClueType::Financial => 3,
            ClueType::Chart => 5,
            ClueType::Analyst => 10,
            ClueType::Insider => 15,
            ClueType::Competitor => 20,
            ClueType::Macro => 25,
            ClueType::Social => 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clue {
    pub id: String,
    pub clue_type: ClueType,
    pub content: String,
    /// Always within [0, 1].
    pub reliability: f64,
    pub cost_energy: u32,
    /// Base investigation time in seconds.
    pub cost_time: u32,
    pub is_discovered: bool,
    pub discovered_at: Option<DateTime<Utc>>,
    pub related_clues: Vec<String>,
    pub contradicts: Vec<String>,
}

impl Clue {
    pub fn new(
        id: impl Into<String>,
        clue_type: ClueType,
        content: impl Into<String>,
        reliability: f64,
        cost_energy: u32,
        cost_time: u32,
    ) -> Self {
        Self {
            id: id.into(),
            clue_type,
            content: content.into(),
            reliability: reliability.clamp(0.0, 1.0),
            cost_energy,
            cost_time,
            is_discovered: false,
            discovered_at: None,
            related_clues: Vec::new(),
            contradicts: Vec::new(),
        }
    }

    pub fn mark_discovered(&mut self, at: DateTime<Utc>) {
        self.is_discovered = true;
        self.discovered_at = Some(at);
    }
}
