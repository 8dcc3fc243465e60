use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dag::critical_path::{CriticalPath, critical_path};
use crate::dag::declaration::GoalDeclaration;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::dag::store::{FileGoalStore, GoalStore, SchedulerSnapshot};
use crate::dag::task::{Goal, GoalStatus, Task, TaskOutcome, TaskStatus};
use crate::errors::{Result, WardenError};
use crate::types::{GoalId, TaskId};

/// Scheduler owns every loaded goal and its task DAG.
///
/// It is responsible for:
/// - resolving goal declarations (rejecting cyclic ones)
/// - deciding which tasks are `ready` (all dependencies satisfied)
/// - recording execution results, retries and retry ceilings
/// - blocking dependents of failed tasks and detecting deadlocked goals
/// - persisting the full goal/task set after every mutation
///
/// It never executes anything and never prevents several ready tasks from
/// running at once; the orchestrator decides how many run.
pub struct Scheduler {
    goals: BTreeMap<GoalId, Goal>,
    store: Box<dyn GoalStore>,
    default_max_retries: u32,
    /// Monotonically increasing load counter; orders goals for selection.
    load_counter: u64,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("goals", &self.goals.keys().collect::<Vec<_>>())
            .field("default_max_retries", &self.default_max_retries)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Empty scheduler persisting into `store`.
    pub fn new(store: Box<dyn GoalStore>, default_max_retries: u32) -> Self {
        Self {
            goals: BTreeMap::new(),
            store,
            default_max_retries: default_max_retries.max(1),
            load_counter: 0,
        }
    }

    /// Empty scheduler whose snapshots go to an in-memory filesystem.
    pub fn in_memory(default_max_retries: u32) -> Self {
        Self::new(Box::new(FileGoalStore::in_memory()), default_max_retries)
    }

    /// Rebuild the scheduler from the last snapshot in `store`.
    ///
    /// The restored state is exactly what was saved; only status propagation
    /// is re-run. Tasks caught `running` by a crash stay `running` until the
    /// orchestrator calls [`Scheduler::requeue_interrupted`].
    pub fn restore(store: Box<dyn GoalStore>, default_max_retries: u32) -> Result<Self> {
        let snapshot = store.load()?;
        let mut scheduler = Self::new(store, default_max_retries);

        if let Some(snapshot) = snapshot {
            for mut goal in snapshot.goals {
                StateManager::new(&mut goal).propagate();
                scheduler.load_counter = scheduler.load_counter.max(goal.load_seq);
                scheduler.goals.insert(goal.id.clone(), goal);
            }
            info!(
                goals = scheduler.goals.len(),
                saved_at = %snapshot.saved_at,
                "scheduler restored from snapshot"
            );
        }

        Ok(scheduler)
    }

    /// Resolve and install a goal declaration.
    ///
    /// A goal with the same id is superseded. Nothing is installed if the
    /// declaration is invalid (e.g. [`WardenError::DagCycle`]).
    pub fn load(&mut self, declaration: GoalDeclaration) -> Result<GoalId> {
        let mut goal = match declaration.resolve(self.default_max_retries) {
            Ok(goal) => goal,
            Err(e) => {
                warn!(error = %e, "rejected goal declaration");
                return Err(e);
            }
        };

        self.load_counter += 1;
        goal.load_seq = self.load_counter;

        {
            let mut manager = StateManager::new(&mut goal);
            manager.propagate();
            manager.evaluate_goal();
        }

        let id = goal.id.clone();
        if self.goals.insert(id.clone(), goal).is_some() {
            info!(goal = %id, "goal reloaded; previous task state superseded");
        } else {
            info!(goal = %id, "goal loaded");
        }

        self.persist();
        Ok(id)
    }

    /// Like [`Scheduler::load`], but leaves an already installed goal with the
    /// same id untouched. Returns `None` when the declaration was ignored.
    pub fn load_if_new(&mut self, declaration: GoalDeclaration) -> Result<Option<GoalId>> {
        let id = declaration.goal_id();
        if self.goals.contains_key(&id) {
            info!(goal = %id, "goal already restored; keeping its task state");
            return Ok(None);
        }
        self.load(declaration).map(Some)
    }

    /// Read a declaration file (TOML or JSON) and load it.
    pub fn load_from_path(&mut self, path: impl AsRef<Path>) -> Result<GoalId> {
        let declaration = GoalDeclaration::from_path(path)?;
        self.load(declaration)
    }

    pub fn goal(&self, goal_id: &str) -> Option<&Goal> {
        self.goals.get(goal_id)
    }

    /// All goals in load order.
    pub fn goals(&self) -> Vec<&Goal> {
        let mut goals: Vec<&Goal> = self.goals.values().collect();
        goals.sort_by_key(|g| g.load_seq);
        goals
    }

    pub fn task(&self, goal_id: &str, task_id: &str) -> Option<&Task> {
        self.goals.get(goal_id)?.tasks.get(task_id)
    }

    /// `ready` tasks of a goal, ascending by priority (declaration order breaks ties).
    pub fn ready_tasks(&self, goal_id: &str) -> Vec<&Task> {
        let Some(goal) = self.goals.get(goal_id) else {
            return Vec::new();
        };
        let mut ready: Vec<&Task> = goal
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Ready)
            .collect();
        ready.sort_by_key(|t| (t.priority, t.seq));
        ready
    }

    /// Head of [`Scheduler::ready_tasks`].
    pub fn next_task(&self, goal_id: &str) -> Option<&Task> {
        self.ready_tasks(goal_id).into_iter().next()
    }

    /// Next task across all active goals: the earliest-loaded active goal
    /// with a ready task wins. Paused and finished goals are skipped.
    pub fn next_ready(&self) -> Option<(&Goal, &Task)> {
        self.goals()
            .into_iter()
            .filter(|g| g.status == GoalStatus::Active)
            .find_map(|g| self.next_task(&g.id).map(|t| (g, t)))
    }

    /// Whether any goal is still `active`.
    pub fn has_active_goals(&self) -> bool {
        self.goals.values().any(|g| g.status == GoalStatus::Active)
    }

    /// Mark a ready task as handed to the execution engine.
    pub fn start_task(&mut self, goal_id: &str, task_id: &str) -> Result<()> {
        let task = self.task_mut(goal_id, task_id)?;
        if task.status != TaskStatus::Ready {
            return Err(WardenError::InvalidTaskState {
                task: task_id.to_string(),
                action: "start",
                status: task.status.to_string(),
            });
        }

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        debug!(goal = %goal_id, task = %task_id, attempt = task.retry_count + 1, "task started");

        self.persist();
        Ok(())
    }

    /// Record the outcome of one execution attempt.
    ///
    /// - success: the task completes and dependents may become ready;
    /// - failure: the retry counter increments; at the ceiling (or for a
    ///   non-retryable failure) the task fails and its dependents block,
    ///   otherwise it goes straight back to `ready`.
    pub fn record_result(
        &mut self,
        goal_id: &str,
        task_id: &str,
        outcome: TaskOutcome,
    ) -> Result<SchedulerStep> {
        let task = self.task_mut(goal_id, task_id)?;
        if !matches!(task.status, TaskStatus::Running | TaskStatus::Ready) {
            return Err(WardenError::InvalidTaskState {
                task: task_id.to_string(),
                action: "record a result",
                status: task.status.to_string(),
            });
        }

        let mut will_retry = false;
        match outcome {
            TaskOutcome::Success {
                output,
                duration_ms,
            } => {
                task.status = TaskStatus::Completed;
                task.actual_duration_ms = Some(duration_ms);
                task.result = Some(output);
                task.error = None;
                task.completed_at = Some(Utc::now());
                info!(goal = %goal_id, task = %task_id, duration_ms, "task completed");
            }
            TaskOutcome::Failure {
                error,
                duration_ms,
                retryable,
            } => {
                task.retry_count += 1;
                task.actual_duration_ms = Some(duration_ms);
                task.error = Some(error);

                if !retryable || task.retry_count >= task.max_retries {
                    task.status = TaskStatus::Failed;
                    task.completed_at = Some(Utc::now());
                    warn!(
                        goal = %goal_id,
                        task = %task_id,
                        attempts = task.retry_count,
                        max_retries = task.max_retries,
                        retryable,
                        "task failed permanently; blocking dependents"
                    );
                } else {
                    task.status = TaskStatus::Ready;
                    will_retry = true;
                    info!(
                        goal = %goal_id,
                        task = %task_id,
                        attempts = task.retry_count,
                        max_retries = task.max_retries,
                        "task failed; scheduled for retry"
                    );
                }
            }
        }

        Ok(self.finish_step(goal_id, task_id, will_retry))
    }

    /// Force-terminate a task with an operator-supplied reason.
    pub fn skip(&mut self, goal_id: &str, task_id: &str, reason: &str) -> Result<SchedulerStep> {
        let task = self.task_mut(goal_id, task_id)?;
        if task.status.is_terminal() {
            return Err(WardenError::InvalidTaskState {
                task: task_id.to_string(),
                action: "be skipped",
                status: task.status.to_string(),
            });
        }

        task.status = TaskStatus::Skipped;
        task.result = Some(format!("skipped: {reason}"));
        task.completed_at = Some(Utc::now());
        info!(goal = %goal_id, task = %task_id, reason = %reason, "task skipped by operator");

        Ok(self.finish_step(goal_id, task_id, false))
    }

    /// Reset a `blocked` or `failed` task to `pending` with its retry counter
    /// zeroed. A goal that had deadlocked becomes active again.
    pub fn unblock(&mut self, goal_id: &str, task_id: &str) -> Result<SchedulerStep> {
        let goal = self
            .goals
            .get_mut(goal_id)
            .ok_or_else(|| WardenError::GoalNotFound(goal_id.to_string()))?;
        let task = goal
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| WardenError::TaskNotFound(format!("{goal_id}/{task_id}")))?;

        if !matches!(task.status, TaskStatus::Blocked | TaskStatus::Failed) {
            return Err(WardenError::InvalidTaskState {
                task: task_id.to_string(),
                action: "be unblocked",
                status: task.status.to_string(),
            });
        }

        task.status = TaskStatus::Pending;
        task.retry_count = 0;
        task.error = None;
        task.completed_at = None;

        if goal.status == GoalStatus::Failed {
            goal.status = GoalStatus::Active;
        }
        info!(goal = %goal_id, task = %task_id, "task unblocked by operator");

        Ok(self.finish_step(goal_id, task_id, false))
    }

    /// Put an active goal on hold; its tasks are no longer selected.
    pub fn pause_goal(&mut self, goal_id: &str) -> Result<()> {
        let goal = self.goal_mut(goal_id)?;
        if goal.status != GoalStatus::Active {
            return Err(WardenError::GraphError(format!(
                "goal '{goal_id}' cannot be paused while {}",
                goal.status
            )));
        }
        goal.status = GoalStatus::Paused;
        info!(goal = %goal_id, "goal paused");
        self.persist();
        Ok(())
    }

    pub fn resume_goal(&mut self, goal_id: &str) -> Result<()> {
        let goal = self.goal_mut(goal_id)?;
        if goal.status != GoalStatus::Paused {
            return Err(WardenError::GraphError(format!(
                "goal '{goal_id}' cannot be resumed while {}",
                goal.status
            )));
        }
        goal.status = GoalStatus::Active;
        StateManager::new(goal).evaluate_goal();
        info!(goal = %goal_id, "goal resumed");
        self.persist();
        Ok(())
    }

    /// Longest remaining chain of estimated work in a goal.
    pub fn critical_path(&self, goal_id: &str) -> Result<CriticalPath> {
        let goal = self
            .goals
            .get(goal_id)
            .ok_or_else(|| WardenError::GoalNotFound(goal_id.to_string()))?;
        Ok(critical_path(goal))
    }

    /// Return tasks left `running` by an interrupted process to `ready`.
    ///
    /// The interrupted attempt is not counted against the retry ceiling.
    pub fn requeue_interrupted(&mut self) -> Vec<(GoalId, TaskId)> {
        let mut requeued = Vec::new();

        for goal in self.goals.values_mut() {
            let mut touched = false;
            for task in goal.tasks.values_mut() {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Ready;
                    task.started_at = None;
                    requeued.push((goal.id.clone(), task.id.clone()));
                    touched = true;
                }
            }
            if touched {
                StateManager::new(goal).propagate();
            }
        }

        if !requeued.is_empty() {
            warn!(?requeued, "requeued tasks interrupted by a restart");
            self.persist();
        }
        requeued
    }

    /// Propagate statuses, re-evaluate the goal, persist and describe the change.
    fn finish_step(&mut self, goal_id: &str, task_id: &str, will_retry: bool) -> SchedulerStep {
        let step = match self.goals.get_mut(goal_id) {
            Some(goal) => {
                let mut manager = StateManager::new(goal);
                let propagation = manager.propagate();
                let changed = manager.evaluate_goal();

                match changed {
                    Some(GoalStatus::Completed) => {
                        info!(goal = %goal.id, "all tasks finished; goal completed")
                    }
                    Some(GoalStatus::Failed) => warn!(
                        goal = %goal.id,
                        blocked = goal.count(TaskStatus::Blocked),
                        failed = goal.count(TaskStatus::Failed),
                        "no runnable tasks left; goal failed"
                    ),
                    _ => {}
                }

                SchedulerStep {
                    goal_id: goal.id.clone(),
                    task_id: task_id.to_string(),
                    task_status: goal
                        .tasks
                        .get(task_id)
                        .map(|t| t.status)
                        .unwrap_or(TaskStatus::Pending),
                    will_retry,
                    newly_ready: propagation.newly_ready,
                    newly_blocked: propagation.newly_blocked,
                    goal_status: goal.status,
                    goal_status_changed: changed.is_some(),
                    progress: goal.progress,
                }
            }
            None => SchedulerStep {
                goal_id: goal_id.to_string(),
                task_id: task_id.to_string(),
                task_status: TaskStatus::Pending,
                will_retry,
                newly_ready: Vec::new(),
                newly_blocked: Vec::new(),
                goal_status: GoalStatus::Failed,
                goal_status_changed: false,
                progress: 0,
            },
        };

        self.persist();
        step
    }

    fn goal_mut(&mut self, goal_id: &str) -> Result<&mut Goal> {
        self.goals
            .get_mut(goal_id)
            .ok_or_else(|| WardenError::GoalNotFound(goal_id.to_string()))
    }

    fn task_mut(&mut self, goal_id: &str, task_id: &str) -> Result<&mut Task> {
        self.goal_mut(goal_id)?
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| WardenError::TaskNotFound(format!("{goal_id}/{task_id}")))
    }

    /// Best-effort snapshot write; failures are logged and retried on the
    /// next mutation.
    fn persist(&mut self) {
        let snapshot = SchedulerSnapshot {
            saved_at: Utc::now(),
            goals: self.goals().into_iter().cloned().collect(),
        };
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "failed to persist goal snapshot");
        }
    }
}
