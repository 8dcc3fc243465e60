// src/exec/backend.rs

//! Execution engine abstraction.
//!
//! The runtime hands one [`ExecutionRequest`] at a time to an
//! [`ExecutionEngine`] and waits for its [`ExecutionResult`]. Production uses
//! [`crate::exec::CommandEngine`]; tests plug in a scripted fake.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::Serialize;

use crate::dag::TaskOutcome;
use crate::errors::Result;
use crate::types::{GoalId, TaskId};

/// One unit of work handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRequest {
    pub goal_id: GoalId,
    pub task_id: TaskId,
    pub task_name: String,
    /// Task-specific command; engines fall back to their own default.
    pub command: Option<String>,
    /// Goal working context, used as the working directory when set.
    pub working_dir: Option<PathBuf>,
    /// 1-based attempt number.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: u64,
    /// `false` when retrying cannot help (e.g. the wall-clock ceiling was hit).
    pub retryable: bool,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration_ms,
            tokens_used: 0,
            retryable: true,
        }
    }

    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms,
            tokens_used: 0,
            retryable: true,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// What the scheduler records for this attempt.
    pub fn to_outcome(&self) -> TaskOutcome {
        if self.success {
            TaskOutcome::Success {
                output: self.output.clone(),
                duration_ms: self.duration_ms,
            }
        } else {
            TaskOutcome::Failure {
                error: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "task failed without an error message".to_string()),
                duration_ms: self.duration_ms,
                retryable: self.retryable,
            }
        }
    }
}

/// Runs tasks on behalf of the orchestrator.
///
/// An `Err` means the engine itself broke (e.g. the process could not be
/// spawned); the runtime records it as a retryable task failure.
pub trait ExecutionEngine: Send {
    fn execute(
        &mut self,
        request: ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + '_>>;
}
