#![allow(dead_code)]

use chrono::{DateTime, Utc};
use warden::config::{ConfigFile, RawConfigFile};
use warden::dag::{GoalDeclaration, LegacyGoal, Objective, StructuredGoal, TaskDeclaration};
use warden::types::StorageMode;

/// Builder for structured goal declarations.
pub struct GoalBuilder {
    goal: StructuredGoal,
}

impl GoalBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            goal: StructuredGoal {
                id: id.to_string(),
                name: format!("goal {id}"),
                deadline: None,
                working_context: None,
                tasks: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.goal.name = name.to_string();
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.goal.deadline = Some(deadline);
        self
    }

    pub fn working_context(mut self, ctx: &str) -> Self {
        self.goal.working_context = Some(ctx.to_string());
        self
    }

    pub fn task(mut self, task: TaskBuilder) -> Self {
        self.goal.tasks.push(task.build());
        self
    }

    pub fn build(self) -> GoalDeclaration {
        GoalDeclaration::Structured(self.goal)
    }
}

/// Builder for a single task declaration.
pub struct TaskBuilder {
    task: TaskDeclaration,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: TaskDeclaration {
                id: id.to_string(),
                name: format!("task {id}"),
                dependencies: Vec::new(),
                max_retries: None,
                priority: None,
                estimated_duration_ms: None,
                command: None,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.task.max_retries = Some(n);
        self
    }

    pub fn priority(mut self, p: i32) -> Self {
        self.task.priority = Some(p);
        self
    }

    pub fn estimate_ms(mut self, ms: u64) -> Self {
        self.task.estimated_duration_ms = Some(ms);
        self
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.task.command = Some(cmd.to_string());
        self
    }

    pub fn build(self) -> TaskDeclaration {
        self.task
    }
}

/// Legacy declaration: each `(objective id, [task names])` becomes a chain.
pub fn legacy_goal(id: Option<&str>, objectives: &[(&str, &[&str])]) -> GoalDeclaration {
    GoalDeclaration::Legacy(LegacyGoal {
        id: id.map(str::to_string),
        name: None,
        deadline: None,
        working_context: None,
        objectives: objectives
            .iter()
            .map(|(oid, tasks)| Objective {
                id: oid.to_string(),
                name: format!("objective {oid}"),
                tasks: tasks.iter().map(|t| t.to_string()).collect(),
            })
            .collect(),
    })
}

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the defaults with cycle spacing squeezed to zero so runtime
/// tests do not sleep between cycles.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.scheduler.min_cycle_spacing_secs = 0;
        config.scheduler.max_cycle_spacing_secs = 0;
        config.storage.mode = StorageMode::Memory;
        Self { config }
    }

    pub fn default_max_retries(mut self, n: u32) -> Self {
        self.config.scheduler.default_max_retries = n;
        self
    }

    pub fn breaker_thresholds(mut self, soft: u32, hard: u32) -> Self {
        self.config.breaker.soft_failure_threshold = soft;
        self.config.breaker.hard_failure_threshold = hard;
        self
    }

    pub fn same_error_threshold(mut self, n: u32) -> Self {
        self.config.breaker.same_error_threshold = n;
        self
    }

    pub fn max_tokens_per_task(mut self, n: u64) -> Self {
        self.config.breaker.max_tokens_per_task = n;
        self
    }

    pub fn max_history(mut self, n: usize) -> Self {
        self.config.checkpoint.max_history = n;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
