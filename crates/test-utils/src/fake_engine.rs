use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::debug;
use warden::errors::{Result, WardenError};
use warden::exec::{ExecutionEngine, ExecutionRequest, ExecutionResult};

/// A fake engine that:
/// - records every request it receives
/// - answers from a per-task script (results or engine errors), falling back
///   to success.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<HashMap<String, VecDeque<Result<ExecutionResult>>>>>,
    executed: Arc<Mutex<Vec<ExecutionRequest>>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `result` as the next answer for `task_id`.
    pub fn push(&self, task_id: &str, result: ExecutionResult) -> &Self {
        self.enqueue(task_id, Ok(result))
    }

    /// Queue an engine-level error (the engine itself failed, not the task).
    pub fn push_engine_error(&self, task_id: &str, message: &str) -> &Self {
        self.enqueue(task_id, Err(WardenError::PersistenceError(message.to_string())))
    }

    fn enqueue(&self, task_id: &str, answer: Result<ExecutionResult>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push_back(answer);
        self
    }

    /// Queue `n` identical failures for `task_id`.
    pub fn fail_times(&self, task_id: &str, n: usize, error: &str) -> &Self {
        for _ in 0..n {
            self.push(task_id, ExecutionResult::failure(error, 10));
        }
        self
    }

    /// Task ids in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.task_id.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.executed.lock().unwrap().clone()
    }

    fn answer(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        self.script
            .lock()
            .unwrap()
            .get_mut(&request.task_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Ok(ExecutionResult::success(
                    format!("finished {}", request.task_id),
                    10,
                ))
            })
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn execute(
        &mut self,
        request: ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + '_>> {
        let answer = self.answer(&request);
        debug!(task = %request.task_id, attempt = request.attempt, ok = answer.is_ok(), "scripted answer");
        self.executed.lock().unwrap().push(request);
        Box::pin(async move { answer })
    }
}
