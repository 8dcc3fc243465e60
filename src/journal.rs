// src/journal.rs

//! Append-only, human-readable log of breaker trips and heartbeat alerts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::fs::FileSystem;

pub const JOURNAL_FILE: &str = "journal.log";

#[derive(Debug, Clone)]
pub struct Journal {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl Journal {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl AsRef<Path>) -> Self {
        Self {
            fs,
            path: dir.as_ref().join(JOURNAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `<timestamp> [<kind>] <message>` line.
    ///
    /// Write failures are logged and otherwise ignored.
    pub fn record(&self, kind: &str, message: &str) {
        let line = format!(
            "{} [{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            kind,
            message.replace('\n', " ")
        );
        if let Err(e) = self.fs.append(&self.path, line.as_bytes()) {
            warn!(path = ?self.path, error = %format!("{e:#}"), "failed to append to journal");
        }
    }
}
