//! store::state
//!
//! The sync state file kept inside every reference store.
//!
//! Its presence marks a store as fully created: it is written into the
//! staging directory before the staging directory is renamed into place.
//! Writes go through a temporary file and a rename so a reader never sees
//! a truncated file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::paths::StorePaths;
use crate::core::types::{RepositoryIdentity, UtcTimestamp};

/// Errors reading or writing the sync state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("sync state i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("sync state at {} is not valid: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Persistent record of what a store mirrors and when it was last synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Schema version
    pub version: u32,
    /// Repository the store mirrors
    pub identity: RepositoryIdentity,
    /// Remote URL of the last successful sync
    pub remote_url: String,
    /// When the store was first created
    pub created_at: UtcTimestamp,
    /// When the last successful clone or fetch finished
    pub synchronized_at: UtcTimestamp,
    /// Successful fetches since creation
    #[serde(default)]
    pub fetch_count: u64,
}

impl SyncState {
    pub const VERSION: u32 = 1;

    /// State for a store that was just cloned.
    pub fn new(identity: RepositoryIdentity, remote_url: impl Into<String>) -> Self {
        let now = UtcTimestamp::now();
        Self {
            version: Self::VERSION,
            identity,
            remote_url: remote_url.into(),
            created_at: now.clone(),
            synchronized_at: now,
            fetch_count: 0,
        }
    }

    /// Record a successful fetch.
    pub fn record_fetch(&mut self, remote_url: &str) {
        self.remote_url = remote_url.to_string();
        self.synchronized_at = UtcTimestamp::now();
        self.fetch_count += 1;
    }

    /// Read the state file in `dir`, if there is one.
    pub fn read(dir: &Path) -> Result<Option<Self>, StateError> {
        let path = StorePaths::sync_state_path_in(dir);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StateError::Json { path, source })
    }

    /// Write the state file in `dir`.
    pub fn write(&self, dir: &Path) -> Result<(), StateError> {
        let path = StorePaths::sync_state_path_in(dir);
        let tmp = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(self).map_err(|source| StateError::Json {
                path: path.clone(),
                source,
            })?;

        let io = |source| StateError::Io {
            path: tmp.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io)?;
        file.write_all(content.as_bytes()).map_err(io)?;
        file.sync_all().map_err(io)?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })
    }
}
