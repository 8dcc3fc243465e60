// src/lifecycle/machine.rs

use std::collections::VecDeque;
use std::fmt;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::CheckpointConfig;
use crate::errors::{Result, WardenError};
use crate::lifecycle::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
use crate::lifecycle::state::{AgentState, StateContext, TransitionRecord};

/// Invoked after every applied transition.
pub type StateChangeCallback = Box<dyn FnMut(&TransitionRecord, &StateContext) + Send>;

/// Lifecycle state machine with bounded history and checkpointing.
///
/// Legal moves come from [`AgentState::successors`]; an illegal request is
/// rejected and leaves the machine untouched. Entering `blocked`, `error` or
/// `shutdown` always writes a checkpoint.
pub struct StateMachine {
    state: AgentState,
    context: StateContext,
    history: VecDeque<TransitionRecord>,
    version: u64,
    max_history: usize,
    store: Box<dyn CheckpointStore>,
    on_change: Option<StateChangeCallback>,
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("history_len", &self.history.len())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl StateMachine {
    /// Fresh machine in `idle`.
    pub fn new(store: Box<dyn CheckpointStore>, max_history: usize) -> Self {
        Self {
            state: AgentState::Idle,
            context: StateContext::default(),
            history: VecDeque::new(),
            version: 0,
            max_history: max_history.max(1),
            store,
            on_change: None,
        }
    }

    pub fn in_memory(max_history: usize) -> Self {
        Self::new(Box::new(FileCheckpointStore::in_memory()), max_history)
    }

    pub fn from_config(cfg: &CheckpointConfig, store: Box<dyn CheckpointStore>) -> Self {
        Self::new(store, cfg.max_history)
    }

    /// Resume from the latest checkpoint in `store`, or start fresh in `idle`.
    ///
    /// A checkpoint taken in the middle of work (`planning`, `executing`,
    /// `verifying`) cannot be trusted, so the machine is forced into `error`
    /// with a note naming the interrupted state.
    pub fn recover_from_store(store: Box<dyn CheckpointStore>, max_history: usize) -> Result<Self> {
        let checkpoint = store.load()?;
        let mut machine = Self::new(store, max_history);

        let Some(checkpoint) = checkpoint else {
            info!("no checkpoint found; starting in idle");
            return Ok(machine);
        };

        machine.state = checkpoint.state;
        machine.context = checkpoint.context;
        machine.history = checkpoint.history.into();
        machine.version = checkpoint.version;
        machine.trim_history();

        info!(
            state = %machine.state,
            version = machine.version,
            saved_at = %checkpoint.saved_at,
            "restored lifecycle from checkpoint"
        );

        if machine.state.is_interrupted_work() {
            let interrupted = machine.state;
            warn!(state = %interrupted, "checkpoint taken mid-work; entering error");
            machine.apply(
                AgentState::Error,
                format!("crash recovery: interrupted while {interrupted}"),
                true,
                |ctx| {
                    ctx.note = Some(format!("recovered from crash while {interrupted}"));
                },
            );
        }

        Ok(machine)
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn context(&self) -> &StateContext {
        &self.context
    }

    /// Transition history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Version of the last written checkpoint.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Time spent in the current state so far.
    pub fn time_in_state(&self) -> chrono::Duration {
        Utc::now() - self.context.entered_at
    }

    pub fn on_state_change(&mut self, callback: StateChangeCallback) {
        self.on_change = Some(callback);
    }

    pub fn can_transition_to(&self, to: AgentState) -> bool {
        self.state.can_transition_to(to)
    }

    pub fn transition(&mut self, to: AgentState, reason: impl Into<String>) -> Result<()> {
        self.transition_with(to, reason, |_| {})
    }

    /// Legality-checked transition that also updates the context.
    pub fn transition_with<F>(
        &mut self,
        to: AgentState,
        reason: impl Into<String>,
        update: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut StateContext),
    {
        if !self.state.can_transition_to(to) {
            debug!(from = %self.state, to = %to, "rejected illegal transition");
            return Err(WardenError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.apply(to, reason.into(), false, update);
        Ok(())
    }

    /// Move to `to` without consulting the transition table.
    pub fn force_state(&mut self, to: AgentState, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(from = %self.state, to = %to, reason = %reason, "forcing lifecycle state");
        self.apply(to, reason, true, |_| {});
        if !to.forces_checkpoint() {
            self.checkpoint_or_warn();
        }
    }

    /// `error` is the only recoverable state.
    pub fn can_recover(&self) -> bool {
        self.state == AgentState::Error
    }

    /// Leave `error` for `target`, clearing the failure streak and last error.
    pub fn recover(&mut self, target: AgentState) -> Result<()> {
        if !self.can_recover() {
            return Err(WardenError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        self.transition_with(target, "recovered from error", |ctx| {
            ctx.consecutive_failures = 0;
            ctx.last_error = None;
        })
    }

    /// Periodic checkpoint; only written in an active state.
    ///
    /// Returns whether a checkpoint was written.
    pub fn tick_auto_checkpoint(&mut self) -> Result<bool> {
        if !self.state.is_active() {
            return Ok(false);
        }
        self.checkpoint()?;
        Ok(true)
    }

    /// Write the current state as the latest checkpoint.
    pub fn checkpoint(&mut self) -> Result<()> {
        let checkpoint = self.next_checkpoint();
        self.store.save(&checkpoint)
    }

    /// Store the current state under `name` next to the latest checkpoint.
    pub fn save_snapshot(&mut self, name: &str) -> Result<()> {
        let checkpoint = self.next_checkpoint();
        self.store.save_named(name, &checkpoint)?;
        info!(name = %name, version = checkpoint.version, "named snapshot saved");
        Ok(())
    }

    pub fn load_snapshot(&self, name: &str) -> Result<Option<Checkpoint>> {
        self.store.load_named(name)
    }

    fn next_checkpoint(&mut self) -> Checkpoint {
        self.version += 1;
        Checkpoint {
            state: self.state,
            context: self.context.clone(),
            history: self.history.iter().cloned().collect(),
            version: self.version,
            saved_at: Utc::now(),
        }
    }

    fn checkpoint_or_warn(&mut self) {
        if let Err(e) = self.checkpoint() {
            warn!(state = %self.state, error = %e, "failed to write checkpoint");
        }
    }

    fn apply<F>(&mut self, to: AgentState, reason: String, forced: bool, update: F)
    where
        F: FnOnce(&mut StateContext),
    {
        let now = Utc::now();
        let from = self.state;
        let duration_ms = self.time_in_state().num_milliseconds().max(0) as u64;

        update(&mut self.context);
        self.context.entered_at = now;
        self.context.previous_state_duration_ms = duration_ms;

        let record = TransitionRecord {
            from,
            to,
            at: now,
            reason,
            duration_in_previous_ms: duration_ms,
            forced,
        };
        self.history.push_back(record.clone());
        self.trim_history();
        self.state = to;

        debug!(from = %from, to = %to, reason = %record.reason, "lifecycle transition");

        if let Some(cb) = self.on_change.as_mut() {
            cb(&record, &self.context);
        }

        if to.forces_checkpoint() {
            self.checkpoint_or_warn();
        }
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}
