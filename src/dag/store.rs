// src/dag/store.rs

//! Durable storage for the scheduler's goal/task set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dag::task::Goal;
use crate::errors::{Result, WardenError};
use crate::fs::{FileSystem, MemoryFileSystem};

/// File name of the scheduler snapshot inside the state directory.
pub const GOALS_FILE: &str = "goals.json";

/// Everything the scheduler needs to come back after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub saved_at: DateTime<Utc>,
    pub goals: Vec<Goal>,
}

/// Abstract storage for scheduler snapshots.
pub trait GoalStore: Send + Sync {
    fn load(&self) -> Result<Option<SchedulerSnapshot>>;
    fn save(&mut self, snapshot: &SchedulerSnapshot) -> Result<()>;
}

/// Stores the snapshot as JSON at `<dir>/goals.json`.
pub struct FileGoalStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl FileGoalStore {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl AsRef<Path>) -> Self {
        Self {
            fs,
            path: dir.as_ref().join(GOALS_FILE),
        }
    }

    /// Store backed by a fresh in-memory filesystem.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryFileSystem::new()), ".")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GoalStore for FileGoalStore {
    fn load(&self) -> Result<Option<SchedulerSnapshot>> {
        if !self.fs.exists(&self.path) {
            debug!(path = ?self.path, "no goal snapshot on disk");
            return Ok(None);
        }

        let contents = self
            .fs
            .read_to_string(&self.path)
            .map_err(|e| WardenError::PersistenceError(format!("{e:#}")))?;
        let snapshot: SchedulerSnapshot = serde_json::from_str(&contents)?;

        info!(
            path = ?self.path,
            goals = snapshot.goals.len(),
            "loaded goal snapshot"
        );
        Ok(Some(snapshot))
    }

    fn save(&mut self, snapshot: &SchedulerSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        self.fs
            .write_atomic(&self.path, &json)
            .map_err(|e| WardenError::PersistenceError(format!("{e:#}")))?;
        debug!(path = ?self.path, goals = snapshot.goals.len(), "saved goal snapshot");
        Ok(())
    }
}
