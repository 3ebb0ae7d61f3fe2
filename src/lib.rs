//! Market anomalies turned into investigation puzzles.
//!
//! The pipeline: [`detector`] scans a watchlist through a [`feed::QuoteFeed`]
//! and emits ranked events, [`puzzle`] turns an event into a puzzle with
//! hidden clues, [`investigation`] spends an investigator's energy to reveal
//! them, [`hypothesis`] scores a submitted hypothesis against a simulated
//! outcome, and [`lifecycle`] keeps a bounded pool of live puzzles fresh.

pub mod clock;
pub mod clue;
pub mod config;
pub mod content;
pub mod detector;
pub mod error;
pub mod feed;
pub mod hypothesis;
pub mod investigation;
pub mod lifecycle;
pub mod logging;
pub mod puzzle;
pub mod random;
pub mod storage;
