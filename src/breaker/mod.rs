// src/breaker/mod.rs

//! Circuit breaker: failure streaks, runaway tasks and loop detection.
//!
//! Levels only go up (`closed` -> `soft_open` -> `hard_open`). The single
//! automatic way down is a success while `soft_open`; `hard_open` needs an
//! explicit [`CircuitBreaker::reset`].

pub mod detect;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::errors::{Result, WardenError};
use crate::types::TaskId;

/// Cycle records kept for loop detection and reporting.
pub const MAX_RECORDS: usize = 20;
/// Trip events kept for reporting.
pub const MAX_TRIP_EVENTS: usize = 50;
/// Number of most recent records the loop detectors look at.
pub const LOOP_WINDOW: usize = 5;
/// Similar earlier outputs needed before a repeated-output trip.
pub const SIMILAR_OUTPUTS_TO_TRIP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripLevel {
    Closed,
    SoftOpen,
    HardOpen,
}

impl fmt::Display for TripLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripLevel::Closed => "closed",
            TripLevel::SoftOpen => "soft_open",
            TripLevel::HardOpen => "hard_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    ConsecutiveFailures,
    RepeatedOutput,
    RepeatedError,
    TaskTimeout,
    TokenBudget,
    Manual,
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripReason::ConsecutiveFailures => "consecutive_failures",
            TripReason::RepeatedOutput => "repeated_output",
            TripReason::RepeatedError => "repeated_error",
            TripReason::TaskTimeout => "task_timeout",
            TripReason::TokenBudget => "token_budget",
            TripReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Outcome of one orchestrator cycle as seen by the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub task_id: Option<TaskId>,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub at: DateTime<Utc>,
}

impl CycleRecord {
    pub fn success(task_id: Option<TaskId>, output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id,
            success: true,
            output: output.into(),
            error: None,
            duration_ms,
            tokens_used: 0,
            at: Utc::now(),
        }
    }

    pub fn failure(task_id: Option<TaskId>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id,
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms,
            tokens_used: 0,
            at: Utc::now(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEvent {
    pub level: TripLevel,
    pub reason: TripReason,
    pub message: String,
    pub task_id: Option<TaskId>,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of the breaker for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    pub level: TripLevel,
    pub consecutive_failures: u32,
    pub current_task: Option<TaskId>,
    pub task_tokens: u64,
    pub task_elapsed_ms: u64,
    pub records: usize,
    pub total_trips: usize,
    pub last_trip: Option<TripEvent>,
}

pub type TripCallback = Box<dyn FnMut(&TripEvent) + Send>;

pub struct CircuitBreaker {
    config: BreakerConfig,
    level: TripLevel,
    consecutive_failures: u32,
    records: VecDeque<CycleRecord>,
    trips: VecDeque<TripEvent>,
    current_task: Option<TaskId>,
    task_started: Option<Instant>,
    task_tokens: u64,
    on_trip: Option<TripCallback>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("level", &self.level)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("current_task", &self.current_task)
            .field("task_tokens", &self.task_tokens)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            level: TripLevel::Closed,
            consecutive_failures: 0,
            records: VecDeque::with_capacity(MAX_RECORDS),
            trips: VecDeque::new(),
            current_task: None,
            task_started: None,
            task_tokens: 0,
            on_trip: None,
        }
    }

    pub fn on_trip(&mut self, callback: TripCallback) {
        self.on_trip = Some(callback);
    }

    pub fn level(&self) -> TripLevel {
        self.level
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn records(&self) -> impl Iterator<Item = &CycleRecord> {
        self.records.iter()
    }

    pub fn trips(&self) -> impl Iterator<Item = &TripEvent> {
        self.trips.iter()
    }

    pub fn last_trip(&self) -> Option<&TripEvent> {
        self.trips.back()
    }

    /// Begin tracking `task_id`; per-task token and duration counters reset.
    pub fn start_task(&mut self, task_id: impl Into<TaskId>) {
        self.current_task = Some(task_id.into());
        self.task_started = Some(Instant::now());
        self.task_tokens = 0;
    }

    /// Account tokens spent by the tracked task.
    pub fn add_tokens(&mut self, tokens: u64) -> TripLevel {
        self.task_tokens = self.task_tokens.saturating_add(tokens);
        if self.task_tokens > self.config.max_tokens_per_task {
            let message = format!(
                "task used {} tokens (limit {})",
                self.task_tokens, self.config.max_tokens_per_task
            );
            self.trip(TripLevel::HardOpen, TripReason::TokenBudget, message);
        }
        self.level
    }

    /// Feed one cycle outcome through every detector.
    pub fn record_cycle(&mut self, record: CycleRecord) -> TripLevel {
        let same_task =
            self.current_task.is_some() && record.task_id.as_deref() == self.current_task.as_deref();
        if let Some(started) = self.task_started.filter(|_| same_task) {
            let wall_ms = started.elapsed().as_millis() as u64;
            let elapsed_ms = wall_ms.max(record.duration_ms);
            let limit_ms = self.config.max_task_duration_secs.saturating_mul(1000);
            if elapsed_ms > limit_ms {
                let message = format!(
                    "task ran for {}s (limit {}s)",
                    elapsed_ms / 1000,
                    self.config.max_task_duration_secs
                );
                self.trip(TripLevel::HardOpen, TripReason::TaskTimeout, message);
            }
        }

        if record.success {
            self.consecutive_failures = 0;
            if self.level == TripLevel::SoftOpen {
                self.level = TripLevel::Closed;
                info!("successful cycle; breaker closed again");
            }
        } else {
            self.consecutive_failures += 1;
            let failures = self.consecutive_failures;
            if failures >= self.config.hard_failure_threshold {
                self.trip(
                    TripLevel::HardOpen,
                    TripReason::ConsecutiveFailures,
                    format!("{failures} consecutive failures"),
                );
            } else if failures >= self.config.soft_failure_threshold {
                self.trip(
                    TripLevel::SoftOpen,
                    TripReason::ConsecutiveFailures,
                    format!("{failures} consecutive failures"),
                );
            }
        }

        self.records.push_back(record);
        while self.records.len() > MAX_RECORDS {
            self.records.pop_front();
        }

        self.detect_repeated_output();
        self.detect_repeated_error();

        self.level
    }

    /// Raise the level to at least `level` and record the event.
    pub fn trip(&mut self, level: TripLevel, reason: TripReason, message: impl Into<String>) {
        let message = message.into();
        let previous = self.level;
        self.level = self.level.max(level);

        let event = TripEvent {
            level: self.level,
            reason,
            message,
            task_id: self.current_task.clone(),
            at: Utc::now(),
        };

        warn!(
            from = %previous,
            level = %event.level,
            reason = %reason,
            task = ?event.task_id,
            message = %event.message,
            "circuit breaker tripped"
        );

        if let Some(cb) = self.on_trip.as_mut() {
            cb(&event);
        }

        self.trips.push_back(event);
        while self.trips.len() > MAX_TRIP_EVENTS {
            self.trips.pop_front();
        }
    }

    pub fn should_block(&self) -> bool {
        self.level == TripLevel::HardOpen
    }

    pub fn should_warn(&self) -> bool {
        self.level == TripLevel::SoftOpen
    }

    pub fn ensure_can_execute(&self) -> Result<()> {
        if self.should_block() {
            let reason = self
                .last_trip()
                .map(|t| t.message.clone())
                .unwrap_or_else(|| "breaker open".to_string());
            return Err(WardenError::CircuitOpen {
                level: self.level,
                reason,
            });
        }
        Ok(())
    }

    /// Close the breaker, clearing the failure streak and the record window.
    pub fn reset(&mut self) {
        info!(from = %self.level, "circuit breaker reset");
        self.level = TripLevel::Closed;
        self.consecutive_failures = 0;
        self.records.clear();
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            level: self.level,
            consecutive_failures: self.consecutive_failures,
            current_task: self.current_task.clone(),
            task_tokens: self.task_tokens,
            task_elapsed_ms: self
                .task_started
                .map(|s| s.elapsed().as_millis() as u64)
                .unwrap_or(0),
            records: self.records.len(),
            total_trips: self.trips.len(),
            last_trip: self.trips.back().cloned(),
        }
    }

    fn window(&self) -> impl Iterator<Item = &CycleRecord> {
        let skip = self.records.len().saturating_sub(LOOP_WINDOW);
        self.records.iter().skip(skip)
    }

    /// Latest non-trivial output too similar to earlier outputs in the window.
    fn detect_repeated_output(&mut self) {
        let Some(latest) = self.records.back() else {
            return;
        };
        if detect::is_trivial_output(&latest.output) {
            return;
        }

        let threshold = self.config.similarity_threshold_pct as f64 / 100.0;
        let window: Vec<&CycleRecord> = self.window().collect();
        let earlier = &window[..window.len() - 1];
        let compared = earlier.len();
        let similar = earlier
            .iter()
            .filter(|r| !detect::is_trivial_output(&r.output))
            .filter(|r| detect::jaccard_similarity(&latest.output, &r.output) > threshold)
            .count();

        if similar >= SIMILAR_OUTPUTS_TO_TRIP {
            self.trip(
                TripLevel::SoftOpen,
                TripReason::RepeatedOutput,
                format!("output matches {similar} of the previous {compared} cycles"),
            );
        }
    }

    /// The same normalized error repeated within the window.
    fn detect_repeated_error(&mut self) {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for record in self.window() {
            if let Some(error) = record.error.as_deref() {
                *counts.entry(detect::normalize_error(error)).or_default() += 1;
            }
        }

        let repeated = counts
            .into_iter()
            .filter(|(_, n)| *n >= self.config.same_error_threshold)
            .max_by_key(|(_, n)| *n);

        if let Some((error, n)) = repeated {
            self.trip(
                TripLevel::SoftOpen,
                TripReason::RepeatedError,
                format!("same error {n} times: {error}"),
            );
        }
    }
}
