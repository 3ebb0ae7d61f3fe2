//! Puzzle lifecycle: periodic detection, expiry, attempt statistics.
//!
//! A single task owns the registry. Other tasks talk to it through a command
//! channel and read the latest published snapshot; nothing else mutates
//! puzzle state while the scheduler runs.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::SharedClock;
use crate::config::LifecycleConfig;
use crate::detector::{EventDetector, MarketEvent};
use crate::error::PuzzleError;
use crate::investigation::{InvestigationLedger, InvestigationResult};
use crate::logging::{log, log_lifecycle_cycle, obj, v_num, v_str, Domain, Level};
use crate::puzzle::{public_view, Puzzle, PuzzleFactory, Submission};
use crate::storage::ArchiveStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PuzzleStatus {
    Active,
    Completed,
    Expired,
    Archived,
}

impl PuzzleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PuzzleStatus::Active => "active",
            PuzzleStatus::Completed => "completed",
            PuzzleStatus::Expired => "expired",
            PuzzleStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionError {
    pub from: PuzzleStatus,
    pub to: PuzzleStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal transition {} -> {}", self.from.as_str(), self.to.as_str())
    }
}

impl std::error::Error for TransitionError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePuzzle {
    pub puzzle: Puzzle,
    pub event: MarketEvent,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PuzzleStatus,
    pub attempts: u32,
    pub completions: u32,
    pub average_accuracy: f64,
}

impl LivePuzzle {
    pub fn new(puzzle: Puzzle, event: MarketEvent, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            puzzle,
            event,
            created_at: now,
            expires_at: now + lifetime,
            status: PuzzleStatus::Active,
            attempts: 0,
            completions: 0,
            average_accuracy: 0.0,
        }
    }

    pub fn id(&self) -> &str {
        &self.puzzle.id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Remaining over total lifetime, in [0, 1]; zero once expired.
    pub fn freshness(&self, now: DateTime<Utc>) -> f64 {
        if self.is_expired(now) {
            return 0.0;
        }
        let total = (self.expires_at - self.created_at).num_milliseconds() as f64;
        if total <= 0.0 {
            return 0.0;
        }
        let remaining = (self.expires_at - now).num_milliseconds() as f64;
        (remaining / total).clamp(0.0, 1.0)
    }

    /// Active -> {Completed, Expired} -> Archived. Nothing moves backwards.
    pub fn transition(&mut self, to: PuzzleStatus) -> Result<(), TransitionError> {
        use PuzzleStatus::*;
        match (self.status, to) {
            (Active, Completed) | (Active, Expired) | (Completed, Archived) | (Expired, Archived) => {
                self.status = to;
                Ok(())
            }
            (from, to) => Err(TransitionError { from, to }),
        }
    }

    fn record_attempt(&mut self, accuracy: f64, completed: bool) {
        self.attempts += 1;
        if completed {
            self.completions += 1;
            let n = self.completions as f64;
            self.average_accuracy = (self.average_accuracy * (n - 1.0) + accuracy.clamp(0.0, 1.0)) / n;
            if self.status == PuzzleStatus::Active {
                self.status = PuzzleStatus::Completed;
            }
        }
    }

    pub fn to_json(&self, now: DateTime<Utc>) -> Value {
        json!({
            "puzzle": public_view(&self.puzzle),
            "status": self.status.as_str(),
            "worthiness": self.event.worthiness,
            "freshness": self.freshness(now),
            "expires_at": self.expires_at.to_rfc3339(),
            "attempts": self.attempts,
            "completions": self.completions,
            "average_accuracy": self.average_accuracy,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Freshness,
    Difficulty,
    Worthiness,
}

impl SortKey {
    pub fn parse(s: &str) -> Self {
        match s {
            "difficulty" => SortKey::Difficulty,
            "worthiness" => SortKey::Worthiness,
            _ => SortKey::Freshness,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Live puzzles (active or completed, not yet retired) plus a bounded buffer
/// of retired ones.
#[derive(Debug, Default)]
pub struct PuzzleRegistry {
    live: HashMap<String, LivePuzzle>,
    retired: VecDeque<LivePuzzle>,
    retired_capacity: usize,
    created: u64,
}

impl PuzzleRegistry {
    pub fn new(retired_capacity: usize) -> Self {
        Self {
            retired_capacity,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&LivePuzzle> {
        self.live.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut LivePuzzle> {
        self.live.get_mut(id)
    }

    pub fn live(&self) -> impl Iterator<Item = &LivePuzzle> {
        self.live.values()
    }

    pub fn retired(&self) -> impl Iterator<Item = &LivePuzzle> {
        self.retired.iter()
    }

    pub fn has_active_for(&self, symbol: &str) -> bool {
        self.live
            .values()
            .any(|lp| lp.status == PuzzleStatus::Active && lp.event.symbol == symbol)
    }

    pub fn insert(&mut self, lp: LivePuzzle) {
        self.created += 1;
        self.live.insert(lp.puzzle.id.clone(), lp);
    }

    /// Copies of every live puzzle past its expiry, already moved on: Active
    /// ones to Expired, Completed ones to Archived. The registry is untouched.
    fn expired_copies(&self, now: DateTime<Utc>) -> Vec<LivePuzzle> {
        self.live
            .values()
            .filter(|lp| lp.is_expired(now))
            .cloned()
            .map(|mut lp| {
                let to = match lp.status {
                    PuzzleStatus::Active => PuzzleStatus::Expired,
                    _ => PuzzleStatus::Archived,
                };
                if lp.transition(to).is_err() {
                    log(
                        Level::Warn,
                        Domain::Lifecycle,
                        "transition_rejected",
                        obj(&[("puzzle_id", v_str(&lp.puzzle.id)), ("msg", v_str(lp.status.as_str()))]),
                    );
                }
                lp
            })
            .collect()
    }

    /// Replace the live entry with its retired form.
    fn retire(&mut self, lp: LivePuzzle) {
        self.live.remove(&lp.puzzle.id);
        self.push_retired(lp);
    }

    fn push_retired(&mut self, lp: LivePuzzle) {
        if self.retired_capacity == 0 {
            return;
        }
        while self.retired.len() >= self.retired_capacity {
            self.retired.pop_front();
        }
        self.retired.push_back(lp);
    }
}

// =============================================================================
// Timers
// =============================================================================

/// Fires when `interval` has passed since the last run. Fires immediately
/// on first use.
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    interval: Duration,
    last_run: Option<DateTime<Utc>>,
}

impl PeriodicTimer {
    pub fn new(interval_secs: i64) -> Self {
        Self {
            interval: Duration::seconds(interval_secs),
            last_run: None,
        }
    }

    pub fn due(&self, now: DateTime<Utc>) -> bool {
        self.last_run.map_or(true, |t| now - t >= self.interval)
    }

    pub fn mark(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleStats {
    pub total_puzzles: u64,
    pub active_puzzles: usize,
    pub completed_puzzles: usize,
    pub expired_puzzles: usize,
    pub archived_puzzles: usize,
    pub total_attempts: u64,
    pub total_completions: u64,
    pub completion_rate: f64,
    /// Mean of per-puzzle average accuracy over puzzles with completions.
    pub average_accuracy: f64,
    pub system_running: bool,
}

impl LifecycleStats {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub expired: usize,
    pub archived: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub created: Option<Vec<String>>,
    pub cleanup: Option<CleanupReport>,
}

/// Consistent view published by the scheduler after every mutation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub at: Option<DateTime<Utc>>,
    pub stats: LifecycleStats,
    pub active: Vec<LivePuzzle>,
}

// =============================================================================
// Manager
// =============================================================================

pub struct LifecycleManager {
    config: LifecycleConfig,
    detector: EventDetector,
    factory: PuzzleFactory,
    registry: PuzzleRegistry,
    store: Option<ArchiveStore>,
    clock: SharedClock,
    detect_timer: PeriodicTimer,
    cleanup_timer: PeriodicTimer,
    running: bool,
}

impl LifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        detector: EventDetector,
        factory: PuzzleFactory,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry: PuzzleRegistry::new(config.retired_capacity),
            detect_timer: PeriodicTimer::new(config.detection_interval_secs),
            cleanup_timer: PeriodicTimer::new(config.cleanup_interval_secs),
            config,
            detector,
            factory,
            store: None,
            clock,
            running: false,
        }
    }

    pub fn with_store(mut self, store: ArchiveStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &PuzzleRegistry {
        &self.registry
    }

    pub fn store(&self) -> Option<&ArchiveStore> {
        self.store.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Run whichever periodic actions are due.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport::default();
        if self.detect_timer.due(now) {
            report.created = Some(self.detect_cycle().await);
            self.detect_timer.mark(now);
        }
        if self.cleanup_timer.due(now) {
            report.cleanup = Some(self.cleanup()?);
            self.cleanup_timer.mark(now);
        }
        Ok(report)
    }

    /// Detect events and register puzzles for the worthy ones, highest
    /// worthiness first. Returns the ids of the new puzzles.
    pub async fn detect_cycle(&mut self) -> Vec<String> {
        let events = self.detector.detect_events().await;
        let detected = events.len();

        let mut worthy: Vec<MarketEvent> = events
            .into_iter()
            .filter(|e| e.worthiness >= self.config.min_event_worthiness)
            .collect();
        worthy.sort_by(|a, b| b.worthiness.total_cmp(&a.worthiness));
        let worthy_count = worthy.len();

        let mut created = Vec::new();
        for event in worthy {
            if let Err(e) = self.admit(&event) {
                match e {
                    PuzzleError::CapacityExceeded { .. } => {
                        log_lifecycle_cycle("capacity_reached", &[("limit", v_num(self.config.max_active_puzzles as f64))]);
                        break;
                    }
                    other => {
                        log(
                            Level::Debug,
                            Domain::Lifecycle,
                            "event_skipped",
                            obj(&[("symbol", v_str(&event.symbol)), ("msg", v_str(&other.to_string()))]),
                        );
                        continue;
                    }
                }
            }

            let now = self.clock.now();
            let puzzle = self.factory.create_puzzle_from_event(&event);
            self.factory.remove(&puzzle.id);
            let lifetime = Duration::seconds(self.config.puzzle_lifetime_secs);
            let lp = LivePuzzle::new(puzzle, event, now, lifetime);
            created.push(lp.puzzle.id.clone());
            self.registry.insert(lp);
        }

        log_lifecycle_cycle(
            "detect",
            &[
                ("detected", v_num(detected as f64)),
                ("worthy", v_num(worthy_count as f64)),
                ("created", v_num(created.len() as f64)),
                ("live", v_num(self.registry.len() as f64)),
            ],
        );
        created
    }

    fn admit(&self, event: &MarketEvent) -> Result<(), PuzzleError> {
        if self.registry.len() >= self.config.max_active_puzzles {
            return Err(PuzzleError::CapacityExceeded {
                limit: self.config.max_active_puzzles,
            });
        }
        if self.registry.has_active_for(&event.symbol) {
            return Err(PuzzleError::DuplicateEvent {
                symbol: event.symbol.clone(),
                event_type: event.event_type.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Retire every puzzle past its expiry. With an archive store, retired
    /// puzzles are persisted and end up Archived. A failed write leaves the
    /// live registry as it was, so the next cleanup retries the same set.
    pub fn cleanup(&mut self) -> Result<CleanupReport> {
        let now = self.clock.now();
        let mut evicted = self.registry.expired_copies(now);
        let expired = evicted.iter().filter(|lp| lp.status == PuzzleStatus::Expired).count();

        if let Some(store) = self.store.as_mut() {
            for lp in evicted.iter_mut() {
                if lp.status == PuzzleStatus::Expired {
                    let _ = lp.transition(PuzzleStatus::Archived);
                }
            }
            store.archive_puzzles(now, &evicted)?;
        }

        let archived = evicted.iter().filter(|lp| lp.status == PuzzleStatus::Archived).count();
        for lp in evicted {
            self.registry.retire(lp);
        }

        log_lifecycle_cycle(
            "cleanup",
            &[
                ("expired", v_num(expired as f64)),
                ("archived", v_num(archived as f64)),
                ("live", v_num(self.registry.len() as f64)),
            ],
        );
        Ok(CleanupReport { expired, archived })
    }

    pub fn get_active_puzzles(&self, sort_by: SortKey, limit: usize) -> Vec<LivePuzzle> {
        let now = self.clock.now();
        let mut active: Vec<&LivePuzzle> = self
            .registry
            .live()
            .filter(|lp| lp.status == PuzzleStatus::Active && !lp.is_expired(now))
            .collect();
        match sort_by {
            SortKey::Freshness => active.sort_by(|a, b| b.freshness(now).total_cmp(&a.freshness(now))),
            SortKey::Difficulty => active.sort_by_key(|lp| lp.puzzle.difficulty.ordinal()),
            SortKey::Worthiness => active.sort_by(|a, b| b.event.worthiness.total_cmp(&a.event.worthiness)),
        }
        active.into_iter().take(limit).cloned().collect()
    }

    pub fn get_puzzle_by_id(&self, puzzle_id: &str) -> Option<&LivePuzzle> {
        self.registry.get(puzzle_id)
    }

    pub fn record_puzzle_attempt(&mut self, puzzle_id: &str, accuracy: f64, completed: bool) -> Result<(), PuzzleError> {
        let lp = self
            .registry
            .get_mut(puzzle_id)
            .ok_or_else(|| PuzzleError::PuzzleNotFound(puzzle_id.to_string()))?;
        lp.record_attempt(accuracy, completed);
        log(
            Level::Info,
            Domain::Lifecycle,
            "attempt_recorded",
            obj(&[
                ("puzzle_id", v_str(puzzle_id)),
                ("accuracy", v_num(accuracy)),
                ("completed", Value::Bool(completed)),
                ("attempts", v_num(lp.attempts as f64)),
            ]),
        );
        Ok(())
    }

    pub fn investigate_clue(
        &mut self,
        puzzle_id: &str,
        clue_id: &str,
        ledger: &mut InvestigationLedger,
        use_boost: bool,
    ) -> Result<InvestigationResult, PuzzleError> {
        let lp = self
            .registry
            .get_mut(puzzle_id)
            .ok_or_else(|| PuzzleError::PuzzleNotFound(puzzle_id.to_string()))?;
        lp.puzzle.investigate_clue(clue_id, ledger, use_boost)
    }

    pub fn submit_hypothesis(
        &mut self,
        puzzle_id: &str,
        statement: &str,
        evidence: &[String],
    ) -> Result<Submission, PuzzleError> {
        let now = self.clock.now();
        let lp = self
            .registry
            .get_mut(puzzle_id)
            .ok_or_else(|| PuzzleError::PuzzleNotFound(puzzle_id.to_string()))?;
        Ok(lp.puzzle.submit(statement, evidence, now, self.factory.content()))
    }

    pub fn get_statistics(&self) -> LifecycleStats {
        let all: Vec<&LivePuzzle> = self.registry.live().chain(self.registry.retired()).collect();
        let count = |s: PuzzleStatus| all.iter().filter(|lp| lp.status == s).count();

        let total_attempts: u64 = all.iter().map(|lp| lp.attempts as u64).sum();
        let total_completions: u64 = all.iter().map(|lp| lp.completions as u64).sum();
        let solved: Vec<f64> = all
            .iter()
            .filter(|lp| lp.completions > 0)
            .map(|lp| lp.average_accuracy)
            .collect();

        LifecycleStats {
            total_puzzles: self.registry.created,
            active_puzzles: count(PuzzleStatus::Active),
            completed_puzzles: count(PuzzleStatus::Completed),
            expired_puzzles: count(PuzzleStatus::Expired),
            archived_puzzles: count(PuzzleStatus::Archived),
            total_attempts,
            total_completions,
            completion_rate: if total_attempts > 0 {
                total_completions as f64 / total_attempts as f64
            } else {
                0.0
            },
            average_accuracy: if solved.is_empty() {
                0.0
            } else {
                solved.iter().sum::<f64>() / solved.len() as f64
            },
            system_running: self.running,
        }
    }

    /// Run a detection cycle now, regardless of the timer.
    pub async fn force_detection_cycle(&mut self) -> Vec<LivePuzzle> {
        let now = self.clock.now();
        self.detect_cycle().await;
        self.detect_timer.mark(now);
        self.get_active_puzzles(SortKey::Freshness, self.config.max_active_puzzles)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            at: Some(self.clock.now()),
            stats: self.get_statistics(),
            active: self.get_active_puzzles(SortKey::Freshness, usize::MAX),
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::RecordAttempt { puzzle_id, accuracy, completed, reply } => {
                let _ = reply.send(self.record_puzzle_attempt(&puzzle_id, accuracy, completed));
            }
            Command::SubmitHypothesis { puzzle_id, statement, evidence, reply } => {
                let _ = reply.send(self.submit_hypothesis(&puzzle_id, &statement, &evidence));
            }
            Command::ForceDetection { reply } => {
                let _ = reply.send(self.force_detection_cycle().await);
            }
            Command::GetPuzzle { puzzle_id, reply } => {
                let _ = reply.send(self.get_puzzle_by_id(&puzzle_id).cloned());
            }
            Command::ActivePuzzles { sort_by, limit, reply } => {
                let _ = reply.send(self.get_active_puzzles(sort_by, limit));
            }
            Command::InvestigateClue { puzzle_id, clue_id, mut ledger, use_boost, reply } => {
                let result = self.investigate_clue(&puzzle_id, &clue_id, &mut ledger, use_boost);
                let _ = reply.send((ledger, result));
            }
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
        snapshots: watch::Sender<Snapshot>,
    ) -> Self {
        self.running = true;
        let _ = snapshots.send(self.snapshot());
        log(Level::Info, Domain::Lifecycle, "scheduler_started", obj(&[]));

        let mut poll = tokio::time::interval(std::time::Duration::from_secs(self.config.poll_tick_secs.max(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let backoff = std::time::Duration::from_secs(self.config.error_backoff_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(cmd) = commands.recv() => self.handle(cmd).await,
                _ = poll.tick() => {
                    if let Err(e) = self.tick().await {
                        log(
                            Level::Error,
                            Domain::Lifecycle,
                            "cycle_failed",
                            obj(&[
                                ("msg", v_str(&e.to_string())),
                                ("backoff_secs", v_num(backoff.as_secs() as f64)),
                            ]),
                        );
                        let _ = snapshots.send(self.snapshot());
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
            }
            let _ = snapshots.send(self.snapshot());
        }

        self.running = false;
        let _ = snapshots.send(self.snapshot());
        log(Level::Info, Domain::Lifecycle, "scheduler_stopped", obj(&[]));
        self
    }
}

// =============================================================================
// Scheduler handle
// =============================================================================

enum Command {
    RecordAttempt {
        puzzle_id: String,
        accuracy: f64,
        completed: bool,
        reply: oneshot::Sender<Result<(), PuzzleError>>,
    },
    SubmitHypothesis {
        puzzle_id: String,
        statement: String,
        evidence: Vec<String>,
        reply: oneshot::Sender<Result<Submission, PuzzleError>>,
    },
    ForceDetection {
        reply: oneshot::Sender<Vec<LivePuzzle>>,
    },
    GetPuzzle {
        puzzle_id: String,
        reply: oneshot::Sender<Option<LivePuzzle>>,
    },
    ActivePuzzles {
        sort_by: SortKey,
        limit: usize,
        reply: oneshot::Sender<Vec<LivePuzzle>>,
    },
    /// The ledger travels to the scheduler and comes back with the reply.
    InvestigateClue {
        puzzle_id: String,
        clue_id: String,
        ledger: InvestigationLedger,
        use_boost: bool,
        reply: oneshot::Sender<(InvestigationLedger, Result<InvestigationResult, PuzzleError>)>,
    },
}

struct Running {
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<LifecycleManager>,
}

enum State {
    Idle(LifecycleManager),
    Running(Running),
    Poisoned,
}

/// Owns the manager while idle and the scheduler task while running.
/// `start` and `stop` are idempotent.
pub struct LifecycleService {
    state: State,
    snapshots: watch::Receiver<Snapshot>,
    snapshot_tx: Option<watch::Sender<Snapshot>>,
}

impl LifecycleService {
    pub fn new(manager: LifecycleManager) -> Self {
        let (tx, rx) = watch::channel(manager.snapshot());
        Self {
            state: State::Idle(manager),
            snapshots: rx,
            snapshot_tx: Some(tx),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn start(&mut self) {
        if self.is_running() {
            log(Level::Warn, Domain::Lifecycle, "already_running", obj(&[]));
            return;
        }
        let manager = match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Idle(m) => m,
            other => {
                self.state = other;
                return;
            }
        };
        let snapshot_tx = match self.snapshot_tx.take() {
            Some(tx) => tx,
            None => {
                let (tx, rx) = watch::channel(manager.snapshot());
                self.snapshots = rx;
                tx
            }
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(manager.run(cmd_rx, stop_rx, snapshot_tx));
        self.state = State::Running(Running {
            commands: cmd_tx,
            shutdown: stop_tx,
            task,
        });
    }

    /// Signal the scheduler and wait for its current step to finish.
    pub async fn stop(&mut self) -> Result<()> {
        let running = match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Running(r) => r,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let _ = running.shutdown.send(true);
        drop(running.commands);
        let manager = running.task.await?;
        let (tx, rx) = watch::channel(manager.snapshot());
        self.snapshots = rx;
        self.snapshot_tx = Some(tx);
        self.state = State::Idle(manager);
        Ok(())
    }

    /// Direct access while idle.
    pub fn manager_mut(&mut self) -> Option<&mut LifecycleManager> {
        match &mut self.state {
            State::Idle(m) => Some(m),
            _ => None,
        }
    }

    async fn request<T>(&mut self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let State::Running(r) = &self.state else {
            return None;
        };
        let (tx, rx) = oneshot::channel();
        r.commands.send(build(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn record_puzzle_attempt(&mut self, puzzle_id: &str, accuracy: f64, completed: bool) -> Result<(), PuzzleError> {
        if let Some(m) = self.manager_mut() {
            return m.record_puzzle_attempt(puzzle_id, accuracy, completed);
        }
        let puzzle_id = puzzle_id.to_string();
        self.request(|reply| Command::RecordAttempt { puzzle_id, accuracy, completed, reply })
            .await
            .unwrap_or_else(|| Err(PuzzleError::SchedulerUnavailable))
    }

    pub async fn submit_hypothesis(&mut self, puzzle_id: &str, statement: &str, evidence: &[String]) -> Result<Submission, PuzzleError> {
        if let Some(m) = self.manager_mut() {
            return m.submit_hypothesis(puzzle_id, statement, evidence);
        }
        let (puzzle_id, statement, evidence) = (puzzle_id.to_string(), statement.to_string(), evidence.to_vec());
        self.request(|reply| Command::SubmitHypothesis { puzzle_id, statement, evidence, reply })
            .await
            .unwrap_or_else(|| Err(PuzzleError::SchedulerUnavailable))
    }

    /// Reveal a clue on a live puzzle. If the scheduler goes away before it
    /// replies, `ledger` is left as it was.
    pub async fn investigate_clue(
        &mut self,
        puzzle_id: &str,
        clue_id: &str,
        ledger: &mut InvestigationLedger,
        use_boost: bool,
    ) -> Result<InvestigationResult, PuzzleError> {
        if let Some(m) = self.manager_mut() {
            return m.investigate_clue(puzzle_id, clue_id, ledger, use_boost);
        }
        let (puzzle_id, clue_id, sent) = (puzzle_id.to_string(), clue_id.to_string(), ledger.clone());
        let (returned, result) = self
            .request(|reply| Command::InvestigateClue { puzzle_id, clue_id, ledger: sent, use_boost, reply })
            .await
            .ok_or(PuzzleError::SchedulerUnavailable)?;
        *ledger = returned;
        result
    }

    pub async fn force_detection_cycle(&mut self) -> Vec<LivePuzzle> {
        if let Some(m) = self.manager_mut() {
            return m.force_detection_cycle().await;
        }
        self.request(|reply| Command::ForceDetection { reply }).await.unwrap_or_default()
    }

    pub async fn get_puzzle_by_id(&mut self, puzzle_id: &str) -> Option<LivePuzzle> {
        if let Some(m) = self.manager_mut() {
            return m.get_puzzle_by_id(puzzle_id).cloned();
        }
        let puzzle_id = puzzle_id.to_string();
        self.request(|reply| Command::GetPuzzle { puzzle_id, reply }).await.flatten()
    }

    pub async fn get_active_puzzles(&mut self, sort_by: SortKey, limit: usize) -> Vec<LivePuzzle> {
        if let Some(m) = self.manager_mut() {
            return m.get_active_puzzles(sort_by, limit);
        }
        self.request(|reply| Command::ActivePuzzles { sort_by, limit, reply })
            .await
            .unwrap_or_default()
    }

    /// Latest published statistics; `system_running` reflects the scheduler.
    pub fn get_statistics(&self) -> LifecycleStats {
        self.snapshots.borrow().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::DetectorConfig;
    use crate::content::ContentLibrary;
    use crate::feed::memory::StaticFeed;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    fn manager_with(feed: Arc<StaticFeed>, watch: &[&str], cfg: LifecycleConfig, clock: &ManualClock) -> LifecycleManager {
        let shared: SharedClock = Arc::new(clock.clone());
        let detector_cfg = DetectorConfig {
            watchlist: watch.iter().map(|s| s.to_string()).collect(),
            ..DetectorConfig::default()
        };
        let detector = EventDetector::new(feed, detector_cfg, shared.clone());
        let factory = PuzzleFactory::new(Arc::new(ContentLibrary::standard()), shared.clone(), Some(7));
        LifecycleManager::new(cfg, detector, factory, shared)
    }

    fn busy_feed() -> Arc<StaticFeed> {
        Arc::new(
            StaticFeed::new()
                .with_move("AAA", -8.5, 3.2)
                .with_move("BBB", 5.0, 2.1)
                .with_move("CCC", 3.5, 2.1)
                .with_move("DDD", 0.4, 1.1),
        )
    }

    #[tokio::test]
    async fn test_transitions_never_move_backwards() {
        let clock = ManualClock::new(start());
        let mut m = manager_with(busy_feed(), &["AAA"], LifecycleConfig::default(), &clock);
        let id = m.detect_cycle().await.remove(0);
        let mut lp = m.get_puzzle_by_id(&id).unwrap().clone();

        assert!(lp.transition(PuzzleStatus::Archived).is_err());
        lp.transition(PuzzleStatus::Completed).unwrap();
        let err = lp.transition(PuzzleStatus::Active).unwrap_err();
        assert_eq!(err.to_string(), "illegal transition completed -> active");
        lp.transition(PuzzleStatus::Archived).unwrap();
        assert!(lp.transition(PuzzleStatus::Expired).is_err());
        assert_eq!(lp.status, PuzzleStatus::Archived);
    }

    #[tokio::test]
    async fn test_detect_cycle_respects_worthiness_capacity_and_symbol() {
        let feed = busy_feed();
        let clock = ManualClock::new(start());
        let cfg = LifecycleConfig {
            max_active_puzzles: 2,
            ..LifecycleConfig::default()
        };
        let mut m = manager_with(feed.clone(), &["CCC", "BBB", "AAA", "DDD"], cfg, &clock);

        let created = m.detect_cycle().await;
        assert_eq!(created.len(), 2);
        let symbols: Vec<String> = created
            .iter()
            .map(|id| m.get_puzzle_by_id(id).unwrap().event.symbol.clone())
            .collect();
        assert_eq!(symbols, vec!["AAA".to_string(), "BBB".to_string()]);

        // capacity reached: nothing more even after cooldown
        clock.advance(Duration::hours(2));
        assert!(m.detect_cycle().await.is_empty());
        assert_eq!(m.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_one_active_puzzle_per_symbol() {
        let feed = Arc::new(StaticFeed::new().with_move("AAA", -8.5, 3.2));
        let clock = ManualClock::new(start());
        let mut m = manager_with(feed.clone(), &["AAA"], LifecycleConfig::default(), &clock);

        assert_eq!(m.detect_cycle().await.len(), 1);
        clock.advance(Duration::hours(2));
        feed.set_move("AAA", 7.5, 4.0);
        assert!(m.detect_cycle().await.is_empty());
        assert_eq!(m.get_statistics().active_puzzles, 1);
    }

    #[tokio::test]
    async fn test_low_worthiness_filtered() {
        let feed = Arc::new(StaticFeed::new().with_move("CCC", 3.5, 2.1));
        let clock = ManualClock::new(start());
        let cfg = LifecycleConfig {
            min_event_worthiness: 0.6,
            ..LifecycleConfig::default()
        };
        let mut m = manager_with(feed, &["CCC"], cfg, &clock);
        // 0.7 * 0.7 = 0.49
        assert!(m.detect_cycle().await.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_only_after_deadline() {
        let feed = busy_feed();
        let clock = ManualClock::new(start());
        let mut m = manager_with(feed, &["AAA"], LifecycleConfig::default(), &clock);
        let id = m.detect_cycle().await.remove(0);

        clock.advance(Duration::seconds(21_600));
        let report = m.cleanup().unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(m.get_puzzle_by_id(&id).unwrap().status, PuzzleStatus::Active);
        assert_eq!(m.get_puzzle_by_id(&id).unwrap().freshness(clock.now()), 0.0);

        clock.advance(Duration::seconds(1));
        let report = m.cleanup().unwrap();
        assert_eq!(report.expired, 1);
        assert!(m.get_puzzle_by_id(&id).is_none());
        let stats = m.get_statistics();
        assert_eq!(stats.expired_puzzles, 1);
        assert_eq!(stats.active_puzzles, 0);
        assert_eq!(stats.total_puzzles, 1);
    }

    #[tokio::test]
    async fn test_freshness_and_sorting() {
        let feed = Arc::new(StaticFeed::new().with_move("BBB", 5.0, 2.1).with_failure("AAA"));
        let clock = ManualClock::new(start());
        let mut m = manager_with(feed.clone(), &["AAA", "BBB"], LifecycleConfig::default(), &clock);
        assert_eq!(m.detect_cycle().await.len(), 1);

        clock.advance(Duration::hours(3));
        feed.set_move("AAA", -8.5, 3.2);
        assert_eq!(m.detect_cycle().await.len(), 1);

        let by_fresh = m.get_active_puzzles(SortKey::Freshness, 5);
        assert_eq!(by_fresh.len(), 2);
        assert_eq!(by_fresh[0].event.symbol, "AAA");
        assert!((by_fresh[1].freshness(clock.now()) - 0.5).abs() < 1e-9);

        let by_worth = m.get_active_puzzles(SortKey::Worthiness, 5);
        assert_eq!(by_worth[0].event.symbol, "AAA");

        let by_diff = m.get_active_puzzles(SortKey::Difficulty, 1);
        assert_eq!(by_diff.len(), 1);
        assert_eq!(by_diff[0].puzzle.difficulty, crate::puzzle::Difficulty::Intermediate);
        assert_eq!(SortKey::parse("worthiness"), SortKey::Worthiness);
        assert_eq!(SortKey::parse("bogus"), SortKey::Freshness);
    }

    #[tokio::test]
    async fn test_record_attempts_and_stats() {
        let feed = busy_feed();
        let clock = ManualClock::new(start());
        let mut m = manager_with(feed, &["AAA"], LifecycleConfig::default(), &clock);
        let id = m.detect_cycle().await.remove(0);

        m.record_puzzle_attempt(&id, 0.2, false).unwrap();
        m.record_puzzle_attempt(&id, 0.8, true).unwrap();
        m.record_puzzle_attempt(&id, 0.6, true).unwrap();
        let lp = m.get_puzzle_by_id(&id).unwrap();
        assert_eq!(lp.attempts, 3);
        assert_eq!(lp.completions, 2);
        assert!((lp.average_accuracy - 0.7).abs() < 1e-9);
        assert_eq!(lp.status, PuzzleStatus::Completed);

        let stats = m.get_statistics();
        assert_eq!(stats.completed_puzzles, 1);
        assert!((stats.completion_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_accuracy - 0.7).abs() < 1e-9);
        assert!(!stats.system_running);
        assert_eq!(stats.to_json()["completed_puzzles"], 1);

        assert_eq!(
            m.record_puzzle_attempt("missing", 1.0, true),
            Err(PuzzleError::PuzzleNotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_completed_puzzle_archived_at_expiry() {
        let feed = busy_feed();
        let clock = ManualClock::new(start());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let store = ArchiveStore::open(path.to_str().unwrap()).unwrap();
        let mut m = manager_with(feed, &["AAA", "BBB"], LifecycleConfig::default(), &clock).with_store(store);
        let ids = m.detect_cycle().await;
        m.record_puzzle_attempt(&ids[0], 0.9, true).unwrap();

        clock.advance(Duration::hours(7));
        let report = m.cleanup().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.archived, 2);
        assert_eq!(m.store().unwrap().archived_count().unwrap(), 2);
        let restored = m.store().unwrap().load_archived().unwrap();
        assert!(restored.iter().all(|lp| lp.status == PuzzleStatus::Archived));
        assert_eq!(m.get_statistics().archived_puzzles, 2);
    }

    #[tokio::test]
    async fn test_failed_archive_write_keeps_puzzles_live() {
        let clock = ManualClock::new(start());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let path = path.to_str().unwrap();
        let store = ArchiveStore::open(path).unwrap();
        let mut m = manager_with(busy_feed(), &["AAA"], LifecycleConfig::default(), &clock).with_store(store);
        let id = m.detect_cycle().await.remove(0);

        rusqlite::Connection::open(path)
            .unwrap()
            .execute_batch("DROP TABLE retired_puzzles;")
            .unwrap();
        clock.advance(Duration::hours(7));
        assert!(m.cleanup().is_err());

        assert_eq!(m.get_puzzle_by_id(&id).unwrap().status, PuzzleStatus::Active);
        let stats = m.get_statistics();
        assert_eq!(stats.total_puzzles, 1);
        assert_eq!(stats.active_puzzles, 1);
        assert_eq!(stats.expired_puzzles, 0);
        assert_eq!(stats.archived_puzzles, 0);

        // reopening recreates the table; the same puzzle is retired next time
        drop(ArchiveStore::open(path).unwrap());
        let report = m.cleanup().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.archived, 1);
        assert!(m.get_puzzle_by_id(&id).is_none());
        assert_eq!(m.store().unwrap().archived_count().unwrap(), 1);
        assert_eq!(m.get_statistics().archived_puzzles, 1);
    }

    #[tokio::test]
    async fn test_tick_runs_timers_independently() {
        let feed = busy_feed();
        let clock = ManualClock::new(start());
        let mut m = manager_with(feed, &["AAA"], LifecycleConfig::default(), &clock);

        let first = m.tick().await.unwrap();
        assert_eq!(first.created.map(|v| v.len()), Some(1));
        assert!(first.cleanup.is_some());

        clock.advance(Duration::seconds(30));
        let idle = m.tick().await.unwrap();
        assert!(idle.created.is_none());
        assert!(idle.cleanup.is_none());

        clock.advance(Duration::seconds(300));
        let detect_only = m.tick().await.unwrap();
        assert!(detect_only.created.is_some());
        assert!(detect_only.cleanup.is_none());

        clock.advance(Duration::seconds(1500));
        assert!(m.tick().await.unwrap().cleanup.is_some());
    }

    #[tokio::test]
    async fn test_service_start_stop_idempotent() {
        let feed = busy_feed();
        let clock = ManualClock::new(start());
        let m = manager_with(feed, &["AAA", "BBB"], LifecycleConfig::default(), &clock);
        let mut svc = LifecycleService::new(m);

        svc.stop().await.unwrap();
        assert!(!svc.is_running());

        svc.start();
        svc.start();
        assert!(svc.is_running());

        let active = svc.force_detection_cycle().await;
        assert_eq!(active.len(), 2);
        let id = active[0].puzzle.id.clone();
        svc.record_puzzle_attempt(&id, 0.9, true).await.unwrap();
        assert_eq!(svc.get_puzzle_by_id(&id).await.unwrap().completions, 1);
        assert_eq!(svc.get_active_puzzles(SortKey::Freshness, 10).await.len(), 1);

        let mut rx = svc.subscribe();
        let running = rx.wait_for(|s| s.stats.system_running).await.map(|s| s.stats.clone());
        assert!(running.unwrap().system_running);

        svc.stop().await.unwrap();
        svc.stop().await.unwrap();
        assert!(!svc.is_running());
        let stats = svc.get_statistics();
        assert!(!stats.system_running);
        assert_eq!(stats.completed_puzzles, 1);
        assert_eq!(svc.manager_mut().unwrap().registry().len(), 2);
    }

    #[tokio::test]
    async fn test_service_reveals_clue_while_running() {
        let clock = ManualClock::new(start());
        let content = Arc::new(ContentLibrary::standard());
        let shared: SharedClock = Arc::new(clock.clone());
        let m = manager_with(busy_feed(), &["AAA"], LifecycleConfig::default(), &clock);
        let mut svc = LifecycleService::new(m);
        svc.start();

        let id = svc.force_detection_cycle().await.remove(0).puzzle.id;
        let live = svc.get_puzzle_by_id(&id).await.unwrap();
        let clue = live
            .puzzle
            .available_clues
            .iter()
            .min_by_key(|c| c.cost_energy)
            .unwrap()
            .clone();

        let mut ledger = InvestigationLedger::new(30, content, shared);
        let before = ledger.energy();
        let r = svc.investigate_clue(&id, &clue.id, &mut ledger, false).await.unwrap();
        assert_eq!(r.clue_id, clue.id);
        assert_eq!(ledger.energy(), before - clue.cost_energy);

        let after = svc.get_puzzle_by_id(&id).await.unwrap();
        assert_eq!(after.puzzle.discovered_clues, vec![clue.id.clone()]);
        assert!(after.puzzle.clue(&clue.id).unwrap().is_discovered);

        assert_eq!(
            svc.investigate_clue(&id, &clue.id, &mut ledger, false).await.unwrap_err(),
            PuzzleError::AlreadyDiscovered(clue.id.clone())
        );
        assert_eq!(ledger.energy(), before - clue.cost_energy);
        assert_eq!(
            svc.investigate_clue("missing", &clue.id, &mut ledger, false).await.unwrap_err(),
            PuzzleError::PuzzleNotFound("missing".to_string())
        );

        svc.stop().await.unwrap();
        assert_eq!(ledger.energy(), before - clue.cost_energy);
    }
}
