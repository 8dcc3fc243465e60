// src/dag/declaration.rs

//! Goal declaration formats and their resolution into a [`Goal`].
//!
//! Two input shapes are accepted, as TOML or JSON:
//!
//! ```toml
//! id = "release"
//! name = "Ship the release"
//!
//! [[tasks]]
//! id = "build"
//! name = "Build artifacts"
//!
//! [[tasks]]
//! id = "publish"
//! name = "Publish"
//! dependencies = ["build"]
//! ```
//!
//! and the legacy sequential-objectives shape, where every task of an
//! objective depends on the previous one and objectives are independent:
//!
//! ```toml
//! [[objectives]]
//! id = "docs"
//! name = "Write docs"
//! tasks = ["outline", "draft", "review"]
//! ```
//!
//! The legacy shape never leaves this module: [`GoalDeclaration::resolve`]
//! turns both into the same `Goal`/`Task` set.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::graph::DagGraph;
use crate::dag::task::{Goal, GoalStatus, Task};
use crate::errors::{Result, WardenError};
use crate::types::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GoalDeclaration {
    Structured(StructuredGoal),
    Legacy(LegacyGoal),
}

/// Explicit task list with dependency ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredGoal {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_context: Option<String>,
    pub tasks: Vec<TaskDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDeclaration {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Sequential objectives: `{objectives: [{id, name, tasks: [name...]}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyGoal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_context: Option<String>,
    pub objectives: Vec<Objective>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
}

impl GoalDeclaration {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read a declaration file; `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    /// Goal id this declaration resolves to.
    pub fn goal_id(&self) -> String {
        match self {
            GoalDeclaration::Structured(g) => g.id.clone(),
            GoalDeclaration::Legacy(g) => legacy_goal_id(g),
        }
    }

    /// Validate the declaration and build the goal with initial (all
    /// `pending`) task statuses. Status propagation is the caller's job.
    ///
    /// Fails with [`WardenError::DagCycle`] if the dependency relation is
    /// cyclic and with [`WardenError::GraphError`] for empty goals,
    /// duplicate task ids or dangling dependency references.
    pub fn resolve(self, default_max_retries: u32) -> Result<Goal> {
        let (id, name, deadline, working_context, tasks) = match self {
            GoalDeclaration::Structured(g) => {
                let tasks = structured_tasks(g.tasks, default_max_retries);
                (g.id, g.name, g.deadline, g.working_context, tasks)
            }
            GoalDeclaration::Legacy(g) => {
                let id = legacy_goal_id(&g);
                let name = g.name.clone().unwrap_or_else(|| {
                    g.objectives
                        .iter()
                        .map(|o| o.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                });
                let tasks = legacy_tasks(&g.objectives, default_max_retries);
                (id, name, g.deadline, g.working_context, tasks)
            }
        };

        validate_tasks(&id, &tasks)?;

        let mut goal = Goal {
            id,
            name,
            deadline,
            working_context,
            status: GoalStatus::Active,
            progress: 0,
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect::<BTreeMap<_, _>>(),
            load_seq: 0,
        };
        goal.recompute_progress();

        debug!(goal = %goal.id, tasks = goal.tasks.len(), "resolved goal declaration");
        Ok(goal)
    }
}

fn legacy_goal_id(g: &LegacyGoal) -> String {
    g.id.clone().unwrap_or_else(|| {
        let ids: Vec<&str> = g.objectives.iter().map(|o| o.id.as_str()).collect();
        format!("objectives:{}", ids.join("+"))
    })
}

fn structured_tasks(decls: Vec<TaskDeclaration>, default_max_retries: u32) -> Vec<Task> {
    decls
        .into_iter()
        .enumerate()
        .map(|(seq, d)| {
            let mut task = Task::new(d.id, d.name, seq);
            task.dependencies = dedup_preserving_order(d.dependencies);
            task.max_retries = d.max_retries.unwrap_or(default_max_retries).max(1);
            task.priority = d.priority.unwrap_or(0);
            task.estimated_duration_ms = d.estimated_duration_ms;
            task.command = d.command;
            task
        })
        .collect()
}

/// Task `n` of objective `obj` becomes `obj-n` (1-based) and depends on
/// `obj-(n-1)`. Objective order sets the priority.
fn legacy_tasks(objectives: &[Objective], default_max_retries: u32) -> Vec<Task> {
    let mut tasks = Vec::new();
    for (obj_index, objective) in objectives.iter().enumerate() {
        let mut previous: Option<TaskId> = None;
        for (n, task_name) in objective.tasks.iter().enumerate() {
            let id = format!("{}-{}", objective.id, n + 1);
            let mut task = Task::new(id.clone(), task_name.clone(), tasks.len());
            task.max_retries = default_max_retries.max(1);
            task.priority = obj_index as i32;
            if let Some(prev) = previous.take() {
                task.dependencies.push(prev);
            }
            previous = Some(id);
            tasks.push(task);
        }
    }
    tasks
}

fn dedup_preserving_order(deps: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    deps.into_iter().filter(|d| seen.insert(d.clone())).collect()
}

fn validate_tasks(goal_id: &str, tasks: &[Task]) -> Result<()> {
    if tasks.is_empty() {
        return Err(WardenError::GraphError(format!(
            "goal '{goal_id}' declares no tasks"
        )));
    }

    let mut ids: HashSet<&str> = HashSet::new();
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(WardenError::GraphError(format!(
                "goal '{goal_id}' declares task '{}' more than once",
                task.id
            )));
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(WardenError::GraphError(format!(
                    "task '{}' has unknown dependency '{}'",
                    task.id, dep
                )));
            }
        }
    }

    let graph = DagGraph::from_edges(tasks.iter().map(|t| (&t.id, t.dependencies.as_slice())));
    if let Some(cycle) = graph.find_cycle() {
        return Err(WardenError::DagCycle(cycle));
    }

    Ok(())
}
