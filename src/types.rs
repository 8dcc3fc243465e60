// src/types.rs

use std::str::FromStr;

use serde::Deserialize;

/// Canonical goal identifier used throughout the crate.
pub type GoalId = String;

/// Canonical task identifier (unique within a goal).
pub type TaskId = String;

/// Where durable state (goal snapshot, checkpoints, journal) is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Store state under the configured state directory.
    #[default]
    File,
    /// Keep state in memory only (lost on restart).
    Memory,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StorageMode::File),
            "memory" => Ok(StorageMode::Memory),
            other => Err(format!(
                "invalid storage mode: {other} (expected \"file\" or \"memory\")"
            )),
        }
    }
}
