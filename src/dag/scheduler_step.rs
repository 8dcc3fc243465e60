// src/dag/scheduler_step.rs

//! Step-by-step result type for scheduler mutations.

use crate::dag::task::{GoalStatus, TaskStatus};
use crate::types::{GoalId, TaskId};

/// Structured result of a single mutating scheduler call
/// (`record_result`, `skip`, `unblock`).
///
/// Lets the orchestrator and tests see exactly what changed without diffing
/// the whole goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStep {
    pub goal_id: GoalId,
    pub task_id: TaskId,
    /// Status of `task_id` after the call.
    pub task_status: TaskStatus,
    /// Whether a failed attempt put the task back to `ready`.
    pub will_retry: bool,
    /// Tasks that became ready as a result of this step.
    pub newly_ready: Vec<TaskId>,
    /// Tasks that became blocked as a result of this step.
    pub newly_blocked: Vec<TaskId>,
    /// Goal status after the call.
    pub goal_status: GoalStatus,
    /// Whether this step moved the goal into `goal_status`.
    pub goal_status_changed: bool,
    pub progress: u8,
}

impl SchedulerStep {
    /// The goal reached `completed` or `failed` in this step.
    pub fn goal_just_finished(&self) -> bool {
        self.goal_status_changed
            && matches!(self.goal_status, GoalStatus::Completed | GoalStatus::Failed)
    }
}
