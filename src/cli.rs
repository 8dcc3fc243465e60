// src/cli.rs

//! Command-line surface of the `warden` binary.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;
use crate::types::StorageMode;

/// Command-line arguments for `warden`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "warden",
    version,
    about = "Run goal task graphs with crash recovery, a circuit breaker and adaptive pacing.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML). A missing file means defaults.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Goal declaration to load (TOML or JSON, by extension). Repeatable.
    #[arg(long = "goal", value_name = "FILE")]
    pub goals: Vec<PathBuf>,

    /// Directory for goals.json, checkpoint.json, snapshots/ and journal.log.
    ///
    /// Overrides `[storage].dir`.
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Where durable state lives (`file` or `memory`). Overrides `[storage].mode`.
    #[arg(long, value_name = "MODE")]
    pub storage: Option<StorageMode>,

    /// Re-install `--goal` declarations even when the goal was restored from
    /// the state directory, discarding its task progress.
    #[arg(long)]
    pub reload: bool,

    /// Reset a blocked or failed task before running, as `GOAL/TASK`. Repeatable.
    #[arg(long, value_name = "GOAL/TASK")]
    pub unblock: Vec<String>,

    /// Mark a task as skipped before running, as `GOAL/TASK`. Repeatable.
    #[arg(long, value_name = "GOAL/TASK")]
    pub skip: Vec<String>,

    /// Exit once no goal has runnable work left.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WARDEN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate, print goals and critical paths, but run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Split a `GOAL/TASK` reference at its last `/`.
pub fn parse_task_ref(s: &str) -> Option<(&str, &str)> {
    let (goal, task) = s.rsplit_once('/')?;
    if goal.is_empty() || task.is_empty() {
        return None;
    }
    Some((goal, task))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
