// src/lifecycle/state.rs

//! Lifecycle states, the legal transition table and per-state context.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GoalId, TaskId};

/// Coarse lifecycle of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Planning,
    Executing,
    Verifying,
    Reflecting,
    Blocked,
    Sleeping,
    Error,
    Shutdown,
}

impl AgentState {
    pub const ALL: [AgentState; 9] = [
        AgentState::Idle,
        AgentState::Planning,
        AgentState::Executing,
        AgentState::Verifying,
        AgentState::Reflecting,
        AgentState::Blocked,
        AgentState::Sleeping,
        AgentState::Error,
        AgentState::Shutdown,
    ];

    /// Legal successors of this state.
    pub fn successors(self) -> &'static [AgentState] {
        use AgentState::*;
        match self {
            Idle => &[Planning, Sleeping, Error, Shutdown],
            Planning => &[Executing, Idle, Blocked, Sleeping, Error, Shutdown],
            Executing => &[Verifying, Reflecting, Blocked, Error, Shutdown],
            Verifying => &[Reflecting, Executing, Planning, Blocked, Error, Shutdown],
            Reflecting => &[Planning, Idle, Sleeping, Blocked, Error, Shutdown],
            Blocked => &[Idle, Planning, Error, Shutdown],
            Sleeping => &[Planning, Idle, Error, Shutdown],
            Error => &[Idle, Planning, Reflecting, Shutdown],
            Shutdown => &[],
        }
    }

    pub fn can_transition_to(self, to: AgentState) -> bool {
        self.successors().contains(&to)
    }

    /// States in which periodic checkpoints are written.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AgentState::Planning
                | AgentState::Executing
                | AgentState::Verifying
                | AgentState::Reflecting
        )
    }

    /// Entering one of these states always writes a checkpoint.
    pub fn forces_checkpoint(self) -> bool {
        matches!(
            self,
            AgentState::Blocked | AgentState::Error | AgentState::Shutdown
        )
    }

    /// States that cannot be trusted after a crash; recovery lands in `error`.
    pub fn is_interrupted_work(self) -> bool {
        matches!(
            self,
            AgentState::Planning | AgentState::Executing | AgentState::Verifying
        )
    }

    pub fn is_terminal(self) -> bool {
        self == AgentState::Shutdown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Planning => "planning",
            AgentState::Executing => "executing",
            AgentState::Verifying => "verifying",
            AgentState::Reflecting => "reflecting",
            AgentState::Blocked => "blocked",
            AgentState::Sleeping => "sleeping",
            AgentState::Error => "error",
            AgentState::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentState::ALL
            .into_iter()
            .find(|state| state.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown agent state '{s}'"))
    }
}

/// Data carried alongside the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateContext {
    #[serde(default)]
    pub goal_id: Option<GoalId>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub plan_step: usize,
    #[serde(default)]
    pub cycle_count: u64,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub entered_at: DateTime<Utc>,
    /// Milliseconds spent in the state before the current one.
    #[serde(default)]
    pub previous_state_duration_ms: u64,
    #[serde(default)]
    pub note: Option<String>,
}

impl Default for StateContext {
    fn default() -> Self {
        Self {
            goal_id: None,
            task_id: None,
            plan_id: None,
            plan_step: 0,
            cycle_count: 0,
            consecutive_failures: 0,
            last_error: None,
            entered_at: Utc::now(),
            previous_state_duration_ms: 0,
            note: None,
        }
    }
}

/// One entry of the transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: AgentState,
    pub to: AgentState,
    pub at: DateTime<Utc>,
    pub reason: String,
    pub duration_in_previous_ms: u64,
    /// Set when the transition bypassed the legality table.
    #[serde(default)]
    pub forced: bool,
}
