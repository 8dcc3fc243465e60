// src/dag/state_manager.rs

//! Status propagation and goal-outcome evaluation for a single goal.

use tracing::debug;

use crate::dag::task::{Goal, GoalStatus, TaskStatus};
use crate::types::TaskId;

/// Tasks whose status changed during one propagation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Propagation {
    pub newly_ready: Vec<TaskId>,
    pub newly_blocked: Vec<TaskId>,
}

/// Applies the readiness rules to one goal's tasks.
pub struct StateManager<'a> {
    goal: &'a mut Goal,
}

impl<'a> StateManager<'a> {
    pub fn new(goal: &'a mut Goal) -> Self {
        Self { goal }
    }

    /// Recompute the status of every task that is neither terminal nor
    /// running:
    ///
    /// - `blocked` iff any dependency is `failed` or `blocked`,
    /// - otherwise `ready` iff every dependency is satisfied,
    /// - otherwise `pending`.
    ///
    /// Blocking is transitive, so passes repeat until nothing changes. Both
    /// `ready` and `blocked` are final within one call (they only depend on
    /// terminal or blocked dependencies), so each task is reported once.
    pub fn propagate(&mut self) -> Propagation {
        let mut out = Propagation::default();

        let mut order: Vec<TaskId> = self.goal.tasks.keys().cloned().collect();
        order.sort_by_key(|id| self.goal.tasks.get(id).map(|t| t.seq).unwrap_or(usize::MAX));

        loop {
            let mut changed = false;

            for id in &order {
                let Some(task) = self.goal.tasks.get(id) else {
                    continue;
                };
                if task.status.is_terminal() || task.status == TaskStatus::Running {
                    continue;
                }

                let next = self.derive_status(&task.dependencies);
                if next == task.status {
                    continue;
                }

                if let Some(task) = self.goal.tasks.get_mut(id) {
                    debug!(
                        goal = %self.goal.id,
                        task = %task.id,
                        from = %task.status,
                        to = %next,
                        "task status propagated"
                    );
                    task.status = next;
                }
                match next {
                    TaskStatus::Ready => out.newly_ready.push(id.clone()),
                    TaskStatus::Blocked => out.newly_blocked.push(id.clone()),
                    _ => {}
                }
                changed = true;
            }

            if !changed {
                break;
            }
        }

        out
    }

    fn derive_status(&self, deps: &[TaskId]) -> TaskStatus {
        let mut all_satisfied = true;
        for dep in deps {
            match self.goal.tasks.get(dep).map(|d| d.status) {
                Some(status) if status.blocks_dependents() => return TaskStatus::Blocked,
                Some(status) if status.satisfies_dependents() => {}
                // Unknown ids never survive load; count them as unsatisfied.
                _ => all_satisfied = false,
            }
        }
        if all_satisfied {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        }
    }

    /// Re-derive the goal status from its tasks after a mutation.
    ///
    /// Returns the new status if it changed. Paused goals stay paused.
    pub fn evaluate_goal(&mut self) -> Option<GoalStatus> {
        self.goal.recompute_progress();

        if self.goal.status == GoalStatus::Paused {
            return None;
        }

        let all_done = self
            .goal
            .tasks
            .values()
            .all(|t| t.status.satisfies_dependents());
        let any_runnable = self.goal.tasks.values().any(|t| t.status.is_runnable());

        let next = if all_done {
            GoalStatus::Completed
        } else if !any_runnable {
            GoalStatus::Failed
        } else {
            GoalStatus::Active
        };

        if next == self.goal.status {
            None
        } else {
            self.goal.status = next;
            Some(next)
        }
    }
}
