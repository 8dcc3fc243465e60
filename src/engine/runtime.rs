// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::errors::{Result, WardenError};
use crate::exec::{ExecutionEngine, ExecutionResult};

use super::core::AgentCore;
use super::{CoreCommand, RuntimeEvent, StopReason};

/// Async shell around [`AgentCore`].
///
/// Awaits the one in-flight engine call or the requested pause while the
/// heartbeat and auto-checkpoint timers keep ticking, and turns Ctrl-C into
/// a graceful shutdown: the in-flight call is allowed to finish first.
pub struct Runtime<E: ExecutionEngine> {
    core: AgentCore,
    engine: E,
    event_rx: mpsc::Receiver<RuntimeEvent>,
}

impl<E: ExecutionEngine> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutionEngine> Runtime<E> {
    pub fn new(core: AgentCore, engine: E, event_rx: mpsc::Receiver<RuntimeEvent>) -> Self {
        Self {
            core,
            engine,
            event_rx,
        }
    }

    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    /// Run cycles until the core stops, returning why it stopped together
    /// with the final core state.
    pub async fn run(mut self) -> Result<(StopReason, AgentCore)> {
        info!("warden runtime started");

        let options = *self.core.options();
        let mut heartbeat = interval(options.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut checkpoint = interval(options.checkpoint_interval);
        checkpoint.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Heartbeat pulses once right away; the checkpoint timer starts a
        // full interval from now.
        heartbeat.tick().await;
        self.core.on_heartbeat();
        checkpoint.tick().await;

        let mut events_open = true;
        let mut command = self.core.start();

        let reason = loop {
            debug!(?command, "runtime executing core command");
            command = match command {
                CoreCommand::Stop(reason) => break reason,

                CoreCommand::Execute(request) => {
                    let goal_id = request.goal_id.clone();
                    let task_id = request.task_id.clone();
                    let mut shutdown_requested = false;

                    let call = self.engine.execute(request);
                    tokio::pin!(call);

                    let result = loop {
                        tokio::select! {
                            res = &mut call => break res,
                            _ = heartbeat.tick() => self.core.on_heartbeat(),
                            _ = checkpoint.tick() => self.core.on_checkpoint_tick(),
                            event = self.event_rx.recv(), if events_open && !shutdown_requested => {
                                match event {
                                    Some(RuntimeEvent::ShutdownRequested) => {
                                        info!(task = %task_id, "shutdown requested; waiting for in-flight task");
                                        shutdown_requested = true;
                                    }
                                    None => events_open = false,
                                }
                            }
                        }
                    };

                    let result = result.unwrap_or_else(|e| {
                        warn!(goal = %goal_id, task = %task_id, error = %e, "execution engine error");
                        let error = WardenError::ExecutionError(e.to_string());
                        ExecutionResult::failure(error.to_string(), 0)
                    });

                    let next = self.core.on_task_finished(result);
                    if shutdown_requested {
                        self.core.shutdown()
                    } else {
                        next
                    }
                }

                CoreCommand::Sleep(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "sleeping before next cycle");
                    let pause = tokio::time::sleep(delay);
                    tokio::pin!(pause);

                    loop {
                        tokio::select! {
                            _ = &mut pause => break self.core.wake(),
                            _ = heartbeat.tick() => self.core.on_heartbeat(),
                            _ = checkpoint.tick() => self.core.on_checkpoint_tick(),
                            event = self.event_rx.recv(), if events_open => {
                                match event {
                                    Some(RuntimeEvent::ShutdownRequested) => {
                                        info!("shutdown requested");
                                        break self.core.shutdown();
                                    }
                                    None => events_open = false,
                                }
                            }
                        }
                    }
                }
            };
        };

        info!(reason = %reason, state = %self.core.machine().state(), "runtime exiting");
        Ok((reason, self.core))
    }
}
