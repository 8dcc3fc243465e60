// src/engine/mod.rs

//! Orchestration engine for warden.
//!
//! One cycle asks the scheduler for the next ready task, moves the lifecycle
//! into `executing`, checks the circuit breaker, hands the task to the
//! execution engine, and feeds the result back into the scheduler, breaker
//! and heartbeat before pausing for the recommended delay.
//!
//! The synchronous decision logic lives in [`core`]; the async shell that
//! awaits the engine, timers and Ctrl-C lives in [`runtime`].

use std::fmt;
use std::time::Duration;

use crate::config::ConfigFile;
use crate::exec::ExecutionRequest;

/// Options shared by the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Stop once no goal has runnable work left (used for `--once`).
    pub exit_when_idle: bool,
    pub min_cycle_spacing: Duration,
    pub max_cycle_spacing: Duration,
    pub heartbeat_interval: Duration,
    pub checkpoint_interval: Duration,
}

impl RuntimeOptions {
    pub fn from_config(cfg: &ConfigFile, exit_when_idle: bool) -> Self {
        Self {
            exit_when_idle,
            min_cycle_spacing: Duration::from_secs(cfg.scheduler.min_cycle_spacing_secs),
            max_cycle_spacing: Duration::from_secs(cfg.scheduler.max_cycle_spacing_secs),
            heartbeat_interval: cfg.heartbeat.interval(),
            checkpoint_interval: cfg.checkpoint.interval(),
        }
    }

    /// Keep a recommended delay inside the configured cycle spacing.
    pub fn clamp_delay(&self, delay: Duration) -> Duration {
        delay.clamp(self.min_cycle_spacing, self.max_cycle_spacing)
    }
}

/// Events arriving from outside the orchestrating loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// What the async shell should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Run this task and report back through `AgentCore::on_task_finished`.
    Execute(ExecutionRequest),
    /// Pause, then call `AgentCore::wake`.
    Sleep(Duration),
    /// Leave the loop.
    Stop(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// No goal has runnable work left.
    Idle,
    /// The circuit breaker is hard-open; an operator has to step in.
    Blocked(String),
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Idle => f.write_str("no runnable work left"),
            StopReason::Blocked(reason) => write!(f, "blocked: {reason}"),
            StopReason::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

pub mod core;
pub mod runtime;

pub use core::AgentCore;
pub use runtime::Runtime;
