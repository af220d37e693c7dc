//! Reload log: human-readable warnings for degraded regenerations.
//!
//! Partially-valid and fully-invalid reloads never crash start-up; they are
//! appended to `reload.log` in the store root, each entry carrying the
//! store-start timestamp and the offending identity, and mirrored through
//! `tracing::warn!` for embedders with a subscriber installed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;
use crate::identity::Identity;

const LOG_FILE: &str = "reload.log";

/// Append-only warning log, stamped at store start.
#[derive(Debug)]
pub struct ReloadLog {
    path: PathBuf,
    /// Seconds since UNIX epoch at store start; shared by every entry of
    /// one session so a session's warnings group together.
    started_at: u64,
}

impl ReloadLog {
    /// Create a log writing into the store root.
    pub fn new(store_root: &Path) -> Self {
        Self {
            path: store_root.join(LOG_FILE),
            started_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Record a degraded reload or skipped repair for `identity`.
    pub fn warn(&self, identity: &Identity, message: &str) -> Result<(), StoreError> {
        tracing::warn!(identity = %identity, message, "degraded instance");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "[{}] {}: {}", self.started_at, identity, message)?;
        Ok(())
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
