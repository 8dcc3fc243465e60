// src/lib.rs

pub mod breaker;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod heartbeat;
pub mod journal;
pub mod lifecycle;
pub mod logging;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::breaker::CircuitBreaker;
use crate::cli::{CliArgs, parse_task_ref};
use crate::config::{ConfigFile, load_or_default};
use crate::dag::{FileGoalStore, GoalDeclaration, Scheduler};
use crate::engine::{AgentCore, Runtime, RuntimeEvent, RuntimeOptions, StopReason};
use crate::exec::CommandEngine;
use crate::fs::{FileSystem, MemoryFileSystem, RealFileSystem};
use crate::heartbeat::Heartbeat;
use crate::journal::Journal;
use crate::lifecycle::{AgentState, FileCheckpointStore, StateMachine};
use crate::types::StorageMode;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - state directory, goal snapshot and checkpoint restore
/// - goal declarations from `--goal`
/// - breaker, heartbeat and journal
/// - the command engine and the runtime loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)?;

    if args.dry_run {
        let scheduler = load_goals(
            Scheduler::in_memory(cfg.scheduler.default_max_retries),
            &args.goals,
            true,
        )?;
        print_dry_run(&cfg, &scheduler)?;
        return Ok(());
    }

    let mode = args.storage.unwrap_or(cfg.storage.mode);
    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| cfg.storage.dir.clone());
    let fs: Arc<dyn FileSystem> = match mode {
        StorageMode::File => Arc::new(RealFileSystem),
        StorageMode::Memory => Arc::new(MemoryFileSystem::new()),
    };
    fs.create_dir_all(&state_dir)
        .with_context(|| format!("state directory {:?} is not writable", state_dir))?;
    info!(dir = ?state_dir, ?mode, "using state directory");

    let scheduler = Scheduler::restore(
        Box::new(FileGoalStore::new(fs.clone(), &state_dir)),
        cfg.scheduler.default_max_retries,
    )?;
    let mut scheduler = load_goals(scheduler, &args.goals, args.reload)?;
    apply_operator_actions(&mut scheduler, &args)?;

    let journal = Journal::new(fs.clone(), &state_dir);
    let core = build_core(&cfg, &args, fs, &state_dir, scheduler, journal)?;

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(4);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
    });

    let engine = CommandEngine::new(&cfg.engine);
    let (reason, _core) = Runtime::new(core, engine, rx).run().await?;

    match reason {
        StopReason::Blocked(reason) => bail!("stopped for operator attention: {reason}"),
        other => {
            info!(reason = %other, "warden stopped");
            Ok(())
        }
    }
}

fn build_core(
    cfg: &ConfigFile,
    args: &CliArgs,
    fs: Arc<dyn FileSystem>,
    state_dir: &Path,
    scheduler: Scheduler,
    journal: Journal,
) -> Result<AgentCore> {
    let mut machine = StateMachine::recover_from_store(
        Box::new(FileCheckpointStore::new(fs, state_dir)),
        cfg.checkpoint.max_history,
    )?;
    {
        let journal = journal.clone();
        machine.on_state_change(Box::new(move |record, _ctx| {
            if matches!(record.to, AgentState::Blocked | AgentState::Error) {
                journal.record(record.to.as_str(), &record.reason);
            }
        }));
    }

    let mut breaker = CircuitBreaker::new(cfg.breaker.clone());
    {
        let journal = journal.clone();
        breaker.on_trip(Box::new(move |event| {
            journal.record(
                "trip",
                &format!("{} ({}): {}", event.level, event.reason, event.message),
            );
        }));
    }

    let mut heartbeat = Heartbeat::new(cfg.heartbeat.clone());
    heartbeat.on_alert(Box::new(move |message, _metrics| {
        journal.record("alert", message);
    }));

    let options = RuntimeOptions::from_config(cfg, args.once);
    Ok(AgentCore::new(scheduler, machine, breaker, heartbeat, options))
}

/// Install `--goal` declarations. Goals restored from the state directory
/// keep their progress unless `reload` is set.
fn load_goals(mut scheduler: Scheduler, paths: &[PathBuf], reload: bool) -> Result<Scheduler> {
    for path in paths {
        let declaration = GoalDeclaration::from_path(path)
            .with_context(|| format!("reading goal declaration {:?}", path))?;
        let loaded = if reload {
            scheduler.load(declaration).map(Some)
        } else {
            scheduler.load_if_new(declaration)
        };
        let loaded = loaded.with_context(|| format!("loading goal declaration {:?}", path))?;
        if let Some(id) = loaded {
            debug!(goal = %id, path = ?path, "goal declaration loaded");
        }
    }
    Ok(scheduler)
}

fn apply_operator_actions(scheduler: &mut Scheduler, args: &CliArgs) -> Result<()> {
    for reference in &args.unblock {
        let Some((goal, task)) = parse_task_ref(reference) else {
            bail!("invalid --unblock value '{reference}' (expected GOAL/TASK)");
        };
        scheduler.unblock(goal, task)?;
    }
    for reference in &args.skip {
        let Some((goal, task)) = parse_task_ref(reference) else {
            bail!("invalid --skip value '{reference}' (expected GOAL/TASK)");
        };
        scheduler.skip(goal, task, "skipped from the command line")?;
    }
    Ok(())
}

/// Print configuration, goals, ready sets and critical paths.
fn print_dry_run(cfg: &ConfigFile, scheduler: &Scheduler) -> Result<()> {
    println!("warden dry-run");
    println!(
        "  scheduler: default_max_retries = {}, cycle spacing = {}s..{}s",
        cfg.scheduler.default_max_retries,
        cfg.scheduler.min_cycle_spacing_secs,
        cfg.scheduler.max_cycle_spacing_secs
    );
    println!(
        "  breaker: soft = {}, hard = {}, similarity = {}%, same error = {}",
        cfg.breaker.soft_failure_threshold,
        cfg.breaker.hard_failure_threshold,
        cfg.breaker.similarity_threshold_pct,
        cfg.breaker.same_error_threshold
    );
    println!(
        "  storage: {:?} at {:?}",
        cfg.storage.mode, cfg.storage.dir
    );
    println!();

    let goals = scheduler.goals();
    println!("goals ({}):", goals.len());
    for goal in goals {
        println!("  - {} ({}) [{}]", goal.id, goal.name, goal.status);
        if let Some(deadline) = goal.deadline {
            println!("      deadline: {deadline}");
        }
        if let Some(ref ctx) = goal.working_context {
            println!("      working_context: {ctx}");
        }
        for task in goal.tasks_in_order() {
            println!(
                "      * {} \"{}\" [{}] priority={} max_retries={}",
                task.id, task.name, task.status, task.priority, task.max_retries
            );
            if !task.dependencies.is_empty() {
                println!("          after: {:?}", task.dependencies);
            }
            if let Some(ref cmd) = task.command {
                println!("          cmd: {cmd}");
            }
        }

        let ready: Vec<&str> = scheduler
            .ready_tasks(&goal.id)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        println!("      ready: {ready:?}");

        let path = scheduler.critical_path(&goal.id)?;
        if !path.is_empty() {
            println!(
                "      critical path: {} (~{}s)",
                path.tasks.join(" -> "),
                path.total_estimated_ms / 1000
            );
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
