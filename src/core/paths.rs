//! core::paths
//!
//! Centralized path routing for reference stores and workspaces.
//!
//! # Architecture
//!
//! All on-disk locations the orchestrator touches are computed here, so
//! the lock file, staging directories, and the alternates entry can never
//! drift apart between components.
//!
//! # Storage Layout
//!
//! For a store at `<dir>/<name>.git`:
//! - `<dir>/<name>.git/` - Bare mirror
//! - `<dir>/<name>.git/refcheckout.json` - Sync state
//! - `<dir>/<name>.git.lock` - Cross-process lock file
//! - `<dir>/.<name>.git.staging-<id>/` - In-progress first clone
//!
//! For a workspace at `<target>`:
//! - `<target>/.git/` - Workspace repository
//! - `<target>/.git/objects/info/alternates` - Points at the store objects
//!
//! # Example
//!
//! ```
//! use refcheckout::core::paths::StorePaths;
//! use std::path::PathBuf;
//!
//! let paths = StorePaths::new("/cache/widget.git");
//! assert_eq!(paths.lock_path(), PathBuf::from("/cache/widget.git.lock"));
//! assert_eq!(paths.objects_dir(), PathBuf::from("/cache/widget.git/objects"));
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// File name of the sync state inside a store.
pub const SYNC_STATE_FILE: &str = "refcheckout.json";

/// Paths belonging to one reference store.
///
/// # Invariants
///
/// - The lock file lives next to the store, never inside it, so it can be
///   taken before the store exists and survives the store being replaced
/// - Staging directories are siblings, so the final rename stays on one
///   filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    store_dir: PathBuf,
}

impl StorePaths {
    /// Create paths for the store at `store_dir`.
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
        }
    }

    /// The bare mirror directory.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// The directory containing the store.
    pub fn parent_dir(&self) -> PathBuf {
        match self.store_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> OsString {
        self.store_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("store"))
    }

    /// `<store>.lock`, next to the store.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.file_name();
        name.push(".lock");
        self.parent_dir().join(name)
    }

    /// A staging directory for a first clone, unique per `token`.
    pub fn staging_dir(&self, token: &str) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(self.file_name());
        name.push(".staging-");
        name.push(token);
        self.parent_dir().join(name)
    }

    /// The sync state file inside `dir` (the store or a staging directory).
    pub fn sync_state_path_in(dir: &Path) -> PathBuf {
        dir.join(SYNC_STATE_FILE)
    }

    /// The sync state file of the store.
    pub fn sync_state_path(&self) -> PathBuf {
        Self::sync_state_path_in(&self.store_dir)
    }

    /// The store's object database, used as the workspace alternate.
    pub fn objects_dir(&self) -> PathBuf {
        self.store_dir.join("objects")
    }
}

/// Paths belonging to one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    work_dir: PathBuf,
}

impl WorkspacePaths {
    /// Create paths for the workspace at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// The working tree root.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// `<target>/.git`
    pub fn git_dir(&self) -> PathBuf {
        self.work_dir.join(".git")
    }

    /// `<target>/.git/objects/info/alternates`
    pub fn alternates_path(&self) -> PathBuf {
        self.git_dir().join("objects").join("info").join("alternates")
    }
}
