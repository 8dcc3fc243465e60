// src/dag/mod.rs

//! Goals, task DAGs and scheduling.
//!
//! - [`declaration`] parses goal declarations (structured and legacy).
//! - [`graph`] holds the dependency graph and cycle detection.
//! - [`task`] defines goals, tasks and their statuses.
//! - [`state_manager`] propagates readiness and blocking through a goal.
//! - [`scheduler`] owns all goals and records execution results.
//! - [`critical_path`] estimates the longest remaining chain of work.
//! - [`store`] persists scheduler snapshots.

pub mod critical_path;
pub mod declaration;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod store;
pub mod task;

pub use critical_path::CriticalPath;
pub use declaration::{GoalDeclaration, LegacyGoal, Objective, StructuredGoal, TaskDeclaration};
pub use graph::DagGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use store::{FileGoalStore, GoalStore, SchedulerSnapshot};
pub use task::{Goal, GoalStatus, Task, TaskOutcome, TaskStatus};
