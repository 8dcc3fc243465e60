// src/exec/mod.rs

//! Task execution.
//!
//! - [`backend`] defines the [`ExecutionEngine`] contract the runtime drives.
//! - [`task_runner`] provides [`CommandEngine`], which runs tasks as shell
//!   commands with stall and wall-clock timeouts.

pub mod backend;
pub mod task_runner;

pub use backend::{ExecutionEngine, ExecutionRequest, ExecutionResult};
pub use task_runner::CommandEngine;
