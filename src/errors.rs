// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only a cyclic goal declaration and an unwritable state directory are
//! fatal to the process. Everything else degrades the current goal/task or
//! trips the circuit breaker.

use thiserror::Error;

use crate::breaker::TripLevel;
use crate::lifecycle::AgentState;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Goal not found: {0}")]
    GoalNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The declared dependency graph contains a cycle. Holds the participating
    /// node sequence, closed by repeating the first node.
    #[error("Cycle detected in task graph: {}", .0.join(" -> "))]
    DagCycle(Vec<String>),

    #[error("Invalid goal graph: {0}")]
    GraphError(String),

    #[error("Task '{task}' cannot {action} while {status}")]
    InvalidTaskState {
        task: String,
        action: &'static str,
        status: String,
    },

    #[error("Illegal state transition: {from} -> {to}")]
    InvalidTransition { from: AgentState, to: AgentState },

    #[error("Circuit breaker is {level}: {reason}")]
    CircuitOpen { level: TripLevel, reason: String },

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// Whether this error should stop the whole process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WardenError::DagCycle(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WardenError>;
