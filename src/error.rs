use std::fmt;

use crate::clue::ClueType;

/// Failure taxonomy for the puzzle pipeline.
///
/// None of these are fatal: detection failures shrink one cycle's result set,
/// and investigation/submission failures come back as `success = false`
/// results carrying the rendered message.
#[derive(Debug, Clone, PartialEq)]
pub enum PuzzleError {
    DataUnavailable { symbol: String, reason: String },
    DuplicateEvent { symbol: String, event_type: String },
    CapacityExceeded { limit: usize },
    InsufficientEnergy { required: u32, available: u32 },
    ToolLocked(ClueType),
    AlreadyDiscovered(String),
    PuzzleNotFound(String),
    ClueNotFound(String),
    ValidationDegraded,
    SchedulerUnavailable,
}

impl PuzzleError {
    pub fn code(&self) -> &'static str {
        match self {
            PuzzleError::DataUnavailable { .. } => "DATA_UNAVAILABLE",
            PuzzleError::DuplicateEvent { .. } => "DUPLICATE_EVENT",
            PuzzleError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            PuzzleError::InsufficientEnergy { .. } => "INSUFFICIENT_ENERGY",
            PuzzleError::ToolLocked(_) => "TOOL_LOCKED",
            PuzzleError::AlreadyDiscovered(_) => "CLUE_ALREADY_DISCOVERED",
            PuzzleError::PuzzleNotFound(_) => "PUZZLE_NOT_FOUND",
            PuzzleError::ClueNotFound(_) => "CLUE_NOT_FOUND",
            PuzzleError::ValidationDegraded => "VALIDATION_DEGRADED",
            PuzzleError::SchedulerUnavailable => "SCHEDULER_UNAVAILABLE",
        }
    }
}

impl fmt::Display for PuzzleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PuzzleError::DataUnavailable { symbol, reason } => {
                write!(f, "market data unavailable for {}: {}", symbol, reason)
            }
            PuzzleError::DuplicateEvent { symbol, event_type } => {
                write!(f, "duplicate {} event for {} within cooldown", event_type, symbol)
            }
            PuzzleError::CapacityExceeded { limit } => {
                write!(f, "active puzzle capacity of {} reached", limit)
            }
            PuzzleError::InsufficientEnergy { required, available } => {
                write!(f, "insufficient energy (required: {}, available: {})", required, available)
            }
            PuzzleError::ToolLocked(clue_type) => {
                write!(f, "{} tool locked", clue_type.as_str())
            }
            PuzzleError::AlreadyDiscovered(id) => write!(f, "clue {} already discovered", id),
            PuzzleError::PuzzleNotFound(id) => write!(f, "puzzle {} not found", id),
            PuzzleError::ClueNotFound(id) => write!(f, "clue {} not found", id),
            PuzzleError::ValidationDegraded => {
                write!(f, "no scenario matched; default outcome distribution used")
            }
            PuzzleError::SchedulerUnavailable => write!(f, "lifecycle scheduler is not accepting commands"),
        }
    }
}

impl std::error::Error for PuzzleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_locked_message() {
        let err = PuzzleError::ToolLocked(ClueType::Financial);
        assert_eq!(err.to_string(), "financial tool locked");
        assert_eq!(err.code(), "TOOL_LOCKED");
    }

    #[test]
    fn test_energy_message_reports_both_sides() {
        let err = PuzzleError::InsufficientEnergy { required: 6, available: 4 };
        let msg = err.to_string();
        assert!(msg.contains("required: 6"));
        assert!(msg.contains("available: 4"));
    }
}
