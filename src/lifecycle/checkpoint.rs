// src/lifecycle/checkpoint.rs

//! Checkpoint persistence for crash recovery.
//!
//! On disk a checkpoint is wrapped in an envelope carrying the blake3 digest
//! of the serialized checkpoint. An envelope whose digest does not match (a
//! torn or hand-edited file) is treated as if no checkpoint existed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{Result, WardenError};
use crate::fs::{FileSystem, MemoryFileSystem};
use crate::lifecycle::state::{AgentState, StateContext, TransitionRecord};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Everything needed to resume the lifecycle after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: AgentState,
    pub context: StateContext,
    pub history: Vec<TransitionRecord>,
    pub version: u64,
    pub saved_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    checkpoint: Checkpoint,
}

/// Storage for the latest checkpoint and named snapshots.
pub trait CheckpointStore: Send + Sync {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()>;
    fn load(&self) -> Result<Option<Checkpoint>>;
    fn save_named(&mut self, name: &str, checkpoint: &Checkpoint) -> Result<()>;
    fn load_named(&self, name: &str) -> Result<Option<Checkpoint>>;
}

/// JSON files under a state directory:
/// `<dir>/checkpoint.json` and `<dir>/snapshots/<name>.json`.
pub struct FileCheckpointStore {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl AsRef<Path>) -> Self {
        Self {
            fs,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryFileSystem::new()), ".")
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    pub fn snapshot_path(&self, name: &str) -> Result<PathBuf> {
        validate_snapshot_name(name)?;
        Ok(self.dir.join(SNAPSHOT_DIR).join(format!("{name}.json")))
    }

    fn write(&self, path: &Path, checkpoint: &Checkpoint) -> Result<()> {
        let envelope = Envelope {
            checksum: checksum(checkpoint)?,
            checkpoint: checkpoint.clone(),
        };
        let json = serde_json::to_vec_pretty(&envelope)?;
        self.fs
            .write_atomic(path, &json)
            .map_err(|e| WardenError::PersistenceError(format!("{e:#}")))?;
        debug!(path = ?path, version = checkpoint.version, state = %checkpoint.state, "checkpoint written");
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Option<Checkpoint>> {
        if !self.fs.exists(path) {
            return Ok(None);
        }
        let contents = self
            .fs
            .read_to_string(path)
            .map_err(|e| WardenError::PersistenceError(format!("{e:#}")))?;

        let envelope: Envelope = match serde_json::from_str(&contents) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(path = ?path, error = %e, "unreadable checkpoint ignored");
                return Ok(None);
            }
        };

        let actual = checksum(&envelope.checkpoint)?;
        if actual != envelope.checksum {
            warn!(
                path = ?path,
                expected = %envelope.checksum,
                actual = %actual,
                "checkpoint checksum mismatch; ignoring"
            );
            return Ok(None);
        }

        Ok(Some(envelope.checkpoint))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.latest_path();
        self.write(&path, checkpoint)
    }

    fn load(&self) -> Result<Option<Checkpoint>> {
        self.read(&self.latest_path())
    }

    fn save_named(&mut self, name: &str, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.snapshot_path(name)?;
        self.write(&path, checkpoint)
    }

    fn load_named(&self, name: &str) -> Result<Option<Checkpoint>> {
        let path = self.snapshot_path(name)?;
        self.read(&path)
    }
}

/// blake3 hex digest of the compact JSON form of `checkpoint`.
pub fn checksum(checkpoint: &Checkpoint) -> Result<String> {
    let bytes = serde_json::to_vec(checkpoint)?;
    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    Ok(hasher.finalize().to_hex().to_string())
}

fn validate_snapshot_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(WardenError::PersistenceError(format!(
            "invalid snapshot name '{name}'"
        )))
    }
}
