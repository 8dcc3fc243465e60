// src/engine/core.rs

//! Synchronous orchestration core.
//!
//! [`AgentCore`] owns the scheduler, the lifecycle state machine, the circuit
//! breaker and the heartbeat, and turns each input (wake-up, task result,
//! timer tick, shutdown) into the next [`CoreCommand`]. It never awaits
//! anything, so the whole cycle can be driven step by step in tests.

use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::breaker::{CircuitBreaker, CycleRecord};
use crate::dag::{Scheduler, SchedulerStep};
use crate::engine::{CoreCommand, RuntimeOptions, StopReason};
use crate::exec::{ExecutionRequest, ExecutionResult};
use crate::heartbeat::Heartbeat;
use crate::lifecycle::{AgentState, StateContext, StateMachine};
use crate::types::{GoalId, TaskId};

#[derive(Debug)]
pub struct AgentCore {
    scheduler: Scheduler,
    machine: StateMachine,
    breaker: CircuitBreaker,
    heartbeat: Heartbeat,
    options: RuntimeOptions,
    in_flight: Option<(GoalId, TaskId)>,
}

impl AgentCore {
    pub fn new(
        scheduler: Scheduler,
        machine: StateMachine,
        breaker: CircuitBreaker,
        heartbeat: Heartbeat,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            machine,
            breaker,
            heartbeat,
            options,
            in_flight: None,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_mut(&mut self) -> &mut CircuitBreaker {
        &mut self.breaker
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// The task handed to the engine and not yet reported back.
    pub fn in_flight(&self) -> Option<&(GoalId, TaskId)> {
        self.in_flight.as_ref()
    }

    /// First command after (re)start.
    ///
    /// Tasks left `running` by a crash go back to `ready`, and a lifecycle
    /// restored in `error`, `blocked` or `shutdown` is brought back to a
    /// state from which planning can resume.
    pub fn start(&mut self) -> CoreCommand {
        let requeued = self.scheduler.requeue_interrupted();
        if !requeued.is_empty() {
            info!(count = requeued.len(), "resuming interrupted tasks");
        }

        match self.machine.state() {
            AgentState::Error => {
                info!("restarting in error; recovering to planning");
                if let Err(e) = self.machine.recover(AgentState::Planning) {
                    warn!(error = %e, "recovery refused");
                }
            }
            AgentState::Shutdown => {
                self.machine
                    .force_state(AgentState::Idle, "restarted after shutdown");
            }
            AgentState::Blocked => {
                info!("restarting while blocked; breaker starts closed");
            }
            _ => {}
        }

        self.update_progress();
        self.plan()
    }

    /// The pause requested by [`CoreCommand::Sleep`] is over.
    pub fn wake(&mut self) -> CoreCommand {
        self.plan()
    }

    /// Feed the engine's report for the in-flight task.
    pub fn on_task_finished(&mut self, result: ExecutionResult) -> CoreCommand {
        let Some((goal_id, task_id)) = self.in_flight.take() else {
            warn!("task result received with nothing in flight; ignoring");
            return self.plan();
        };

        self.enter(
            AgentState::Verifying,
            format!("verifying result of task {task_id}"),
        );

        let step = self
            .scheduler
            .record_result(&goal_id, &task_id, result.to_outcome());

        self.breaker.add_tokens(result.tokens_used);
        self.breaker.record_cycle(CycleRecord {
            task_id: Some(task_id.clone()),
            success: result.success,
            output: result.output.clone(),
            error: result.error.clone(),
            duration_ms: result.duration_ms,
            tokens_used: result.tokens_used,
            at: chrono::Utc::now(),
        });
        self.heartbeat.record_cycle(result.success);
        self.update_progress();

        let step = match step {
            Ok(step) => step,
            Err(e) => {
                error!(goal = %goal_id, task = %task_id, error = %e, "could not record task result");
                return self.fail(e.to_string());
            }
        };

        let success = result.success;
        let last_error = result.error.clone();
        self.enter_with(
            AgentState::Reflecting,
            format!("task {task_id} {}", step.task_status),
            |ctx| {
                ctx.cycle_count += 1;
                if success {
                    ctx.consecutive_failures = 0;
                    ctx.last_error = None;
                } else {
                    ctx.consecutive_failures += 1;
                    ctx.last_error = last_error;
                }
            },
        );

        self.reflect(&step)
    }

    /// Heartbeat timer fired.
    pub fn on_heartbeat(&mut self) {
        self.update_progress();
        self.heartbeat.pulse();
    }

    /// Auto-checkpoint timer fired.
    pub fn on_checkpoint_tick(&mut self) {
        match self.machine.tick_auto_checkpoint() {
            Ok(true) => debug!(state = %self.machine.state(), "auto checkpoint written"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "auto checkpoint failed"),
        }
    }

    /// Enter `shutdown` (writing the final checkpoint) and stop.
    pub fn shutdown(&mut self) -> CoreCommand {
        if self.machine.state() != AgentState::Shutdown {
            self.enter(AgentState::Shutdown, "shutdown requested");
        }
        CoreCommand::Stop(StopReason::Shutdown)
    }

    fn plan(&mut self) -> CoreCommand {
        match self.machine.state() {
            AgentState::Planning => {}
            AgentState::Error => {
                if let Err(e) = self.machine.recover(AgentState::Planning) {
                    warn!(error = %e, "recovery refused");
                    self.enter(AgentState::Planning, "next cycle");
                }
            }
            _ => self.enter(AgentState::Planning, "next cycle"),
        }

        let next = self.scheduler.next_ready().map(|(goal, task)| {
            (
                ExecutionRequest {
                    goal_id: goal.id.clone(),
                    task_id: task.id.clone(),
                    task_name: task.name.clone(),
                    command: task.command.clone(),
                    working_dir: goal.working_context.as_ref().map(PathBuf::from),
                    attempt: task.retry_count + 1,
                },
                goal.deadline,
                goal.finished_counts().0,
            )
        });

        let Some((request, deadline, plan_step)) = next else {
            return self.idle();
        };

        if let Err(e) = self.breaker.ensure_can_execute() {
            return self.block(e.to_string());
        }

        if let Err(e) = self
            .scheduler
            .start_task(&request.goal_id, &request.task_id)
        {
            error!(task = %request.task_id, error = %e, "could not start task");
            return self.fail(e.to_string());
        }

        self.breaker.start_task(request.task_id.clone());
        self.heartbeat.set_deadline(deadline);

        let goal_id = request.goal_id.clone();
        let task_id = request.task_id.clone();
        self.enter_with(
            AgentState::Executing,
            format!("executing task {task_id}"),
            |ctx| {
                ctx.goal_id = Some(goal_id.clone());
                ctx.task_id = Some(task_id.clone());
                ctx.plan_id = Some(goal_id.clone());
                ctx.plan_step = plan_step;
            },
        );

        if self.breaker.should_warn() {
            warn!(task = %request.task_id, "breaker is soft-open; executing with caution");
        }

        self.in_flight = Some((request.goal_id.clone(), request.task_id.clone()));
        CoreCommand::Execute(request)
    }

    fn reflect(&mut self, step: &SchedulerStep) -> CoreCommand {
        if self.breaker.should_block() {
            let reason = self
                .breaker
                .last_trip()
                .map(|t| t.message.clone())
                .unwrap_or_else(|| "circuit breaker open".to_string());
            return self.block(reason);
        }

        if step.goal_just_finished() {
            info!(goal = %step.goal_id, status = %step.goal_status, "goal finished");
        }

        if !self.scheduler.has_active_goals() {
            return self.idle();
        }

        let delay = self
            .options
            .clamp_delay(self.heartbeat.recommended_delay());
        self.enter(
            AgentState::Sleeping,
            format!("pausing {}ms before next cycle", delay.as_millis()),
        );
        CoreCommand::Sleep(delay)
    }

    fn idle(&mut self) -> CoreCommand {
        if self.machine.state() != AgentState::Idle {
            self.enter(AgentState::Idle, "no runnable work");
        }
        if self.options.exit_when_idle {
            info!("no runnable work left; exiting");
            CoreCommand::Stop(StopReason::Idle)
        } else {
            CoreCommand::Sleep(self.options.max_cycle_spacing)
        }
    }

    fn block(&mut self, reason: String) -> CoreCommand {
        error!(reason = %reason, "execution blocked; operator attention needed");
        let last = reason.clone();
        self.enter_with(AgentState::Blocked, format!("blocked: {reason}"), |ctx| {
            ctx.last_error = Some(last);
        });
        CoreCommand::Stop(StopReason::Blocked(reason))
    }

    fn fail(&mut self, message: String) -> CoreCommand {
        let last = message.clone();
        self.enter_with(AgentState::Error, message, |ctx| {
            ctx.last_error = Some(last);
        });
        CoreCommand::Sleep(self.options.min_cycle_spacing)
    }

    fn update_progress(&mut self) {
        let (done, total) = self
            .scheduler
            .goals()
            .iter()
            .map(|g| g.finished_counts())
            .fold((0, 0), |(d, t), (gd, gt)| (d + gd, t + gt));
        self.heartbeat.set_progress(done, total);
    }

    fn enter(&mut self, to: AgentState, reason: impl Into<String>) {
        self.enter_with(to, reason, |_| {});
    }

    /// Legal transition, or a logged forced one if the table refuses it.
    fn enter_with<F>(&mut self, to: AgentState, reason: impl Into<String>, update: F)
    where
        F: FnOnce(&mut StateContext),
    {
        let reason = reason.into();
        if let Err(e) = self.machine.transition_with(to, reason.clone(), update) {
            warn!(error = %e, "unexpected lifecycle transition; forcing");
            self.machine.force_state(to, reason);
        }
    }
}
