// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::StorageMode;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// default_max_retries = 3
///
/// [breaker]
/// soft_failure_threshold = 3
/// hard_failure_threshold = 5
///
/// [storage]
/// mode = "file"
/// dir = ".warden"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Validated configuration. Obtain one through `ConfigFile::try_from`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerConfig,
    pub heartbeat: HeartbeatConfig,
    pub breaker: BreakerConfig,
    pub checkpoint: CheckpointConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            scheduler: raw.scheduler,
            heartbeat: raw.heartbeat,
            breaker: raw.breaker,
            checkpoint: raw.checkpoint,
            storage: raw.storage,
            engine: raw.engine,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Retry ceiling for tasks that do not declare `max_retries`.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Lower bound on the pause between two cycles of the same goal.
    #[serde(default = "default_min_cycle_spacing_secs")]
    pub min_cycle_spacing_secs: u64,

    /// Upper bound on the pause between two cycles of the same goal.
    #[serde(default = "default_max_cycle_spacing_secs")]
    pub max_cycle_spacing_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_cycle_spacing_secs() -> u64 {
    1
}

fn default_max_cycle_spacing_secs() -> u64 {
    600
}

impl SchedulerConfig {
    /// Clamp a recommended pause into the configured spacing window.
    pub fn clamp_spacing(&self, delay: Duration) -> Duration {
        delay.clamp(
            Duration::from_secs(self.min_cycle_spacing_secs),
            Duration::from_secs(self.max_cycle_spacing_secs),
        )
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            min_cycle_spacing_secs: default_min_cycle_spacing_secs(),
            max_cycle_spacing_secs: default_max_cycle_spacing_secs(),
        }
    }
}

/// `[heartbeat]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,

    /// Consecutive failures after which a strategy change is suggested.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Deadline closer than this many hours is `critical`.
    #[serde(default = "default_urgency_critical_hours")]
    pub urgency_critical_hours: f64,

    /// Deadline closer than this many hours is `high`.
    #[serde(default = "default_urgency_high_hours")]
    pub urgency_high_hours: f64,

    /// Deadline closer than this many hours is `medium`; anything later is `low`.
    #[serde(default = "default_urgency_medium_hours")]
    pub urgency_medium_hours: f64,

    #[serde(default)]
    pub delays: DelayConfig,
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_urgency_critical_hours() -> f64 {
    2.0
}

fn default_urgency_high_hours() -> f64 {
    12.0
}

fn default_urgency_medium_hours() -> f64 {
    48.0
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval_secs(),
            failure_threshold: default_failure_threshold(),
            urgency_critical_hours: default_urgency_critical_hours(),
            urgency_high_hours: default_urgency_high_hours(),
            urgency_medium_hours: default_urgency_medium_hours(),
            delays: DelayConfig::default(),
        }
    }
}

/// `[heartbeat.delays]`: pause between cycles, picked by
/// `Heartbeat::recommended_delay`.
#[derive(Debug, Clone, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_critical_secs")]
    pub critical_secs: u64,

    #[serde(default = "default_high_secs")]
    pub high_secs: u64,

    /// Used once consecutive failures reach 3.
    #[serde(default = "default_repeated_failure_secs")]
    pub repeated_failure_secs: u64,

    /// Used after one or two consecutive failures.
    #[serde(default = "default_failure_secs")]
    pub failure_secs: u64,

    #[serde(default = "default_medium_secs")]
    pub medium_secs: u64,

    #[serde(default = "default_delay_secs")]
    pub default_secs: u64,
}

fn default_critical_secs() -> u64 {
    5
}

fn default_high_secs() -> u64 {
    15
}

fn default_repeated_failure_secs() -> u64 {
    300
}

fn default_failure_secs() -> u64 {
    60
}

fn default_medium_secs() -> u64 {
    30
}

fn default_delay_secs() -> u64 {
    60
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            critical_secs: default_critical_secs(),
            high_secs: default_high_secs(),
            repeated_failure_secs: default_repeated_failure_secs(),
            failure_secs: default_failure_secs(),
            medium_secs: default_medium_secs(),
            default_secs: default_delay_secs(),
        }
    }
}

/// `[breaker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_soft_failure_threshold")]
    pub soft_failure_threshold: u32,

    #[serde(default = "default_hard_failure_threshold")]
    pub hard_failure_threshold: u32,

    /// Word-set similarity (percent) above which two outputs count as repeats.
    #[serde(default = "default_similarity_threshold_pct")]
    pub similarity_threshold_pct: u32,

    /// How often the same normalized error may appear in the recent window.
    #[serde(default = "default_same_error_threshold")]
    pub same_error_threshold: u32,

    #[serde(default = "default_max_task_duration_secs")]
    pub max_task_duration_secs: u64,

    #[serde(default = "default_max_tokens_per_task")]
    pub max_tokens_per_task: u64,
}

fn default_soft_failure_threshold() -> u32 {
    3
}

fn default_hard_failure_threshold() -> u32 {
    5
}

fn default_similarity_threshold_pct() -> u32 {
    85
}

fn default_same_error_threshold() -> u32 {
    3
}

fn default_max_task_duration_secs() -> u64 {
    30 * 60
}

fn default_max_tokens_per_task() -> u64 {
    200_000
}

impl BreakerConfig {
    pub fn max_task_duration(&self) -> Duration {
        Duration::from_secs(self.max_task_duration_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            soft_failure_threshold: default_soft_failure_threshold(),
            hard_failure_threshold: default_hard_failure_threshold(),
            similarity_threshold_pct: default_similarity_threshold_pct(),
            same_error_threshold: default_same_error_threshold(),
            max_task_duration_secs: default_max_task_duration_secs(),
            max_tokens_per_task: default_max_tokens_per_task(),
        }
    }
}

/// `[checkpoint]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_interval_secs")]
    pub interval_secs: u64,

    /// Maximum number of transition records kept in history.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_checkpoint_interval_secs() -> u64 {
    30
}

fn default_max_history() -> usize {
    100
}

impl CheckpointConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_checkpoint_interval_secs(),
            max_history: default_max_history(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,

    /// Directory holding `goals.json`, `checkpoint.json` and `journal.log`.
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".warden")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            dir: default_state_dir(),
        }
    }
}

/// `[engine]` section: the default command-backed execution engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Shell command template for tasks that do not declare `command`.
    ///
    /// `{task_id}`, `{task_name}` and `{goal_id}` are substituted.
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Kill the process after this long without any output.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    /// Hard wall-clock ceiling for a single execution.
    #[serde(default = "default_max_runtime_secs")]
    pub max_runtime_secs: u64,

    /// Grace period between the terminate request and the forced kill.
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
}

fn default_engine_command() -> String {
    "echo {task_name}".to_string()
}

fn default_stall_timeout_secs() -> u64 {
    300
}

fn default_max_runtime_secs() -> u64 {
    3600
}

fn default_terminate_grace_secs() -> u64 {
    5
}

impl EngineConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            stall_timeout_secs: default_stall_timeout_secs(),
            max_runtime_secs: default_max_runtime_secs(),
            terminate_grace_secs: default_terminate_grace_secs(),
        }
    }
}
