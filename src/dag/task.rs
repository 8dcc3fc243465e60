// src/dag/task.rs

//! Task and goal data model.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GoalId, TaskId};

/// Lifecycle status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on at least one unfinished dependency.
    Pending,
    /// Every dependency is satisfied; eligible for selection.
    Ready,
    /// Handed to the execution engine.
    Running,
    Completed,
    /// Retry ceiling reached (or a non-retryable failure).
    Failed,
    /// Some dependency failed or is itself blocked.
    Blocked,
    /// Force-terminated by an operator.
    Skipped,
}

impl TaskStatus {
    /// `completed`, `failed` and `skipped` never change again without an
    /// explicit `unblock` or a new load.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// A dependency in this state lets its dependents proceed.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    /// A dependency in this state blocks its dependents.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Blocked)
    }

    /// `ready`, `pending` and `running` tasks keep a goal alive.
    pub fn is_runnable(self) -> bool {
        matches!(
            self,
            TaskStatus::Ready | TaskStatus::Pending | TaskStatus::Running
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Direct dependencies, in declaration order.
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Lower sorts first among ready tasks.
    pub priority: i32,
    #[serde(default)]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default)]
    pub actual_duration_ms: Option<u64>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Shell command run by the command engine instead of the configured template.
    #[serde(default)]
    pub command: Option<String>,
    /// Position in the declaration; breaks priority ties.
    pub seq: usize,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, seq: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: 1,
            priority: 0,
            estimated_duration_ms: None,
            actual_duration_ms: None,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            command: None,
            seq,
        }
    }
}

/// Lifecycle status of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Completed,
    /// Deadlocked: nothing left to run but not every task is done.
    Failed,
    /// Operator hold; ignored by task selection.
    Paused,
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GoalStatus::Active => "active",
            GoalStatus::Completed => "completed",
            GoalStatus::Failed => "failed",
            GoalStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// A DAG of tasks with a shared deadline and working context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub name: String,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub working_context: Option<String>,
    pub status: GoalStatus,
    /// Percentage of finished tasks; recomputed, never set directly.
    pub progress: u8,
    pub tasks: BTreeMap<TaskId, Task>,
    /// Order in which goals were loaded; earlier goals are served first.
    #[serde(default)]
    pub load_seq: u64,
}

impl Goal {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tasks in declaration order.
    pub fn tasks_in_order(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    /// Number of tasks currently in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// `(finished, total)` where finished counts completed and skipped tasks.
    pub fn finished_counts(&self) -> (usize, usize) {
        let done = self
            .tasks
            .values()
            .filter(|t| t.status.satisfies_dependents())
            .count();
        (done, self.tasks.len())
    }

    pub(crate) fn recompute_progress(&mut self) {
        let (done, total) = self.finished_counts();
        self.progress = if total == 0 {
            100
        } else {
            ((done as f64 / total as f64) * 100.0).round() as u8
        };
    }
}

/// What the execution engine reported for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success {
        output: String,
        duration_ms: u64,
    },
    Failure {
        error: String,
        duration_ms: u64,
        /// `false` skips the remaining retries (e.g. wall-clock ceiling hit).
        retryable: bool,
    },
}

impl TaskOutcome {
    pub fn success(output: impl Into<String>, duration_ms: u64) -> Self {
        TaskOutcome::Success {
            output: output.into(),
            duration_ms,
        }
    }

    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        TaskOutcome::Failure {
            error: error.into(),
            duration_ms,
            retryable: true,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            TaskOutcome::Success { duration_ms, .. } | TaskOutcome::Failure { duration_ms, .. } => {
                *duration_ms
            }
        }
    }
}
