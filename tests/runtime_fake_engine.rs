mod common;

use std::sync::Arc;

use common::{TestResult, fan_out_goal};
use tokio::sync::mpsc;
use warden::breaker::{CircuitBreaker, TripLevel};
use warden::config::ConfigFile;
use warden::dag::{FileGoalStore, GoalDeclaration, GoalStatus, Scheduler, TaskStatus};
use warden::engine::{AgentCore, CoreCommand, Runtime, RuntimeEvent, RuntimeOptions, StopReason};
use warden::exec::ExecutionResult;
use warden::fs::MemoryFileSystem;
use warden::heartbeat::Heartbeat;
use warden::lifecycle::{AgentState, FileCheckpointStore, StateMachine};
use warden_test_utils::builders::{ConfigFileBuilder, GoalBuilder, TaskBuilder};
use warden_test_utils::fake_engine::ScriptedEngine;
use warden_test_utils::{init_tracing, with_timeout};

fn core_with(cfg: &ConfigFile, scheduler: Scheduler, machine: StateMachine, once: bool) -> AgentCore {
    AgentCore::new(
        scheduler,
        machine,
        CircuitBreaker::new(cfg.breaker.clone()),
        Heartbeat::new(cfg.heartbeat.clone()),
        RuntimeOptions::from_config(cfg, once),
    )
}

fn core_for(cfg: &ConfigFile, goals: Vec<GoalDeclaration>, once: bool) -> AgentCore {
    let mut scheduler = Scheduler::in_memory(cfg.scheduler.default_max_retries);
    for goal in goals {
        scheduler.load(goal).expect("goal should load");
    }
    core_with(cfg, scheduler, StateMachine::in_memory(cfg.checkpoint.max_history), once)
}

async fn run_to_stop(
    core: AgentCore,
    engine: ScriptedEngine,
) -> Result<(StopReason, AgentCore), Box<dyn std::error::Error>> {
    let (_tx, rx) = mpsc::channel(4);
    let outcome = with_timeout(Runtime::new(core, engine, rx).run()).await?;
    Ok(outcome)
}

#[tokio::test]
async fn once_mode_runs_the_dag_to_completion() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let engine = ScriptedEngine::new();

    let (reason, core) = run_to_stop(core_for(&cfg, vec![fan_out_goal()], true), engine.clone()).await?;

    assert_eq!(reason, StopReason::Idle);
    assert_eq!(engine.executed(), vec!["A", "B", "C"]);
    let goal = core.scheduler().goal("g1").unwrap();
    assert_eq!(goal.status, GoalStatus::Completed);
    assert_eq!(goal.progress, 100);
    assert_eq!(core.machine().state(), AgentState::Idle);
    assert_eq!(core.machine().context().cycle_count, 3);
    assert!(core.in_flight().is_none());
    Ok(())
}

#[tokio::test]
async fn retries_then_completes_after_transient_failures() -> TestResult {
    let cfg = ConfigFileBuilder::new().build();
    let engine = ScriptedEngine::new();
    engine.fail_times("A", 2, "connection reset");

    let (reason, core) = run_to_stop(core_for(&cfg, vec![fan_out_goal()], true), engine.clone()).await?;

    assert_eq!(reason, StopReason::Idle);
    assert_eq!(engine.executed(), vec!["A", "A", "A", "B", "C"]);
    let attempts: Vec<u32> = engine.requests().iter().map(|r| r.attempt).take(3).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_eq!(core.breaker().level(), TripLevel::Closed);
    assert_eq!(
        core.scheduler().goal("g1").unwrap().status,
        GoalStatus::Completed
    );
    Ok(())
}

#[tokio::test]
async fn engine_error_is_recorded_as_a_task_failure() -> TestResult {
    let cfg = ConfigFileBuilder::new().build();
    let goal = GoalBuilder::new("g1")
        .task(TaskBuilder::new("A").max_retries(1))
        .task(TaskBuilder::new("B").after("A"))
        .build();
    let engine = ScriptedEngine::new();
    engine.push_engine_error("A", "spawn refused");

    let (reason, core) = run_to_stop(core_for(&cfg, vec![goal], true), engine.clone()).await?;

    assert_eq!(reason, StopReason::Idle);
    assert_eq!(engine.executed(), vec!["A"]);
    let a = core.scheduler().task("g1", "A").unwrap();
    assert_eq!(a.status, TaskStatus::Failed);
    let error = a.error.clone().unwrap_or_default();
    assert!(error.starts_with("Execution error:"), "{error}");
    assert!(error.contains("spawn refused"), "{error}");
    assert_eq!(
        core.scheduler().goal("g1").unwrap().status,
        GoalStatus::Failed
    );
    Ok(())
}

#[tokio::test]
async fn failure_streak_blocks_the_runtime() -> TestResult {
    let cfg = ConfigFileBuilder::new().breaker_thresholds(1, 2).build();
    let goal = GoalBuilder::new("g1")
        .task(TaskBuilder::new("A").max_retries(5))
        .task(TaskBuilder::new("B").after("A"))
        .build();
    let engine = ScriptedEngine::new();
    engine.fail_times("A", 5, "compiler crashed");

    let (reason, core) = run_to_stop(core_for(&cfg, vec![goal], true), engine.clone()).await?;

    assert!(matches!(reason, StopReason::Blocked(_)), "got {reason:?}");
    assert_eq!(engine.executed(), vec!["A", "A"]);
    assert_eq!(core.machine().state(), AgentState::Blocked);
    assert_eq!(core.breaker().level(), TripLevel::HardOpen);
    assert_eq!(core.machine().context().consecutive_failures, 2);
    assert_eq!(
        core.scheduler().task("g1", "A").unwrap().status,
        TaskStatus::Ready,
        "retries remain; the breaker stopped the loop"
    );
    Ok(())
}

#[tokio::test]
async fn token_budget_blocks_after_one_cycle() -> TestResult {
    let cfg = ConfigFileBuilder::new().max_tokens_per_task(100).build();
    let engine = ScriptedEngine::new();
    engine.push(
        "A",
        ExecutionResult::success("summarised the repository", 10).with_tokens(500),
    );

    let (reason, core) = run_to_stop(core_for(&cfg, vec![fan_out_goal()], true), engine.clone()).await?;

    assert!(matches!(reason, StopReason::Blocked(_)));
    assert_eq!(engine.executed(), vec!["A"]);
    assert_eq!(
        core.scheduler().task("g1", "A").unwrap().status,
        TaskStatus::Completed
    );
    Ok(())
}

#[tokio::test]
async fn shutdown_event_stops_gracefully() -> TestResult {
    let cfg = ConfigFileBuilder::new().build();
    let engine = ScriptedEngine::new();
    let core = core_for(&cfg, vec![fan_out_goal()], false);

    let (tx, rx) = mpsc::channel(4);
    tx.send(RuntimeEvent::ShutdownRequested).await?;

    let (reason, core) = with_timeout(Runtime::new(core, engine.clone(), rx).run()).await?;

    assert_eq!(reason, StopReason::Shutdown);
    assert_eq!(core.machine().state(), AgentState::Shutdown);
    assert!(!engine.executed().is_empty(), "the first task was already in flight");
    assert!(core.in_flight().is_none());
    Ok(())
}

#[test]
fn core_can_be_driven_step_by_step() {
    let cfg = ConfigFileBuilder::new().build();
    let mut core = core_for(&cfg, vec![fan_out_goal()], true);

    let CoreCommand::Execute(request) = core.start() else {
        panic!("expected the first task to be executed");
    };
    assert_eq!(request.task_id, "A");
    assert_eq!(request.attempt, 1);
    assert_eq!(core.machine().state(), AgentState::Executing);
    assert_eq!(core.machine().context().task_id.as_deref(), Some("A"));
    assert_eq!(
        core.in_flight(),
        Some(&("g1".to_string(), "A".to_string()))
    );

    let next = core.on_task_finished(ExecutionResult::success("A done", 5));
    assert!(matches!(next, CoreCommand::Sleep(_)), "got {next:?}");
    assert_eq!(core.machine().state(), AgentState::Sleeping);

    let CoreCommand::Execute(request) = core.wake() else {
        panic!("expected B");
    };
    assert_eq!(request.task_id, "B");

    let states: Vec<AgentState> = core.machine().history().map(|r| r.to).collect();
    assert_eq!(
        states,
        vec![
            AgentState::Planning,
            AgentState::Executing,
            AgentState::Verifying,
            AgentState::Reflecting,
            AgentState::Sleeping,
            AgentState::Planning,
            AgentState::Executing,
        ]
    );
}

#[test]
fn result_without_in_flight_task_is_ignored() {
    let cfg = ConfigFileBuilder::new().build();
    let mut core = core_for(&cfg, Vec::new(), true);

    let next = core.on_task_finished(ExecutionResult::success("stray", 1));
    assert_eq!(next, CoreCommand::Stop(StopReason::Idle));
    assert_eq!(core.heartbeat().metrics().cycles, 0);
}

#[test]
fn restart_after_crash_resumes_the_interrupted_task() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().build();
    let fs = Arc::new(MemoryFileSystem::new());
    let goals = || Box::new(FileGoalStore::new(fs.clone(), "state"));
    let checkpoints = || Box::new(FileCheckpointStore::new(fs.clone(), "state"));

    {
        let scheduler = Scheduler::restore(goals(), 3)?;
        let machine = StateMachine::new(checkpoints(), 10);
        let mut core = core_with(&cfg, scheduler, machine, true);
        core.scheduler_mut().load(fan_out_goal())?;

        let CoreCommand::Execute(_) = core.start() else {
            panic!("expected A to start");
        };
        core.on_checkpoint_tick();
    }

    let scheduler = Scheduler::restore(goals(), 3)?;
    assert_eq!(
        scheduler.task("g1", "A").unwrap().status,
        TaskStatus::Running
    );
    let machine = StateMachine::recover_from_store(checkpoints(), 10)?;
    assert_eq!(machine.state(), AgentState::Error);

    let mut core = core_with(&cfg, scheduler, machine, true);
    let CoreCommand::Execute(request) = core.start() else {
        panic!("expected A to be resumed");
    };
    assert_eq!(request.task_id, "A");
    assert_eq!(request.attempt, 1, "an interrupted attempt is not counted");
    assert_eq!(core.machine().state(), AgentState::Executing);
    assert!(
        core.machine()
            .history()
            .any(|r| r.from == AgentState::Error && r.to == AgentState::Planning)
    );
    Ok(())
}
