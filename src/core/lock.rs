//! core::lock
//!
//! Cross-process lock on a reference store.
//!
//! # Architecture
//!
//! The reference store is the one piece of state shared between
//! concurrent jobs on a host. Writers (the store refresh) take the lock
//! exclusively; readers (resolution and workspace materialization) take it
//! shared once the refresh is done. Jobs for different workspaces of the
//! same store therefore only serialize while the store is being updated.
//!
//! The lock file is `<store>.lock` next to the store, so it can be taken
//! before the first clone creates the store directory.
//!
//! # Invariants
//!
//! - Lock is automatically released on drop (RAII pattern)
//! - Waiting is bounded by a caller-supplied timeout and honors cancellation
//! - A process never upgrades a shared lock; it releases and reacquires
//!
//! # Example
//!
//! ```ignore
//! use refcheckout::core::lock::{LockMode, StoreLock};
//!
//! let lock = StoreLock::acquire_within(&paths, LockMode::Exclusive, timeout, &cancel).await?;
//! // refresh the store
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::paths::StorePaths;

const INITIAL_POLL: Duration = Duration::from_millis(25);
const MAX_POLL: Duration = Duration::from_millis(500);

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process already holds a conflicting lock.
    #[error("store lock {} is held by another process", path.display())]
    AlreadyLocked { path: PathBuf },

    /// Gave up waiting for the lock.
    #[error("timed out after {waited:?} waiting for {mode} lock on {}", path.display())]
    Timeout {
        path: PathBuf,
        mode: LockMode,
        waited: Duration,
    },

    /// Cancelled while waiting for the lock.
    #[error("cancelled while waiting for lock on {}", path.display())]
    Cancelled { path: PathBuf },

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    /// Failed to release the lock.
    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

/// Lock flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers at once.
    Shared,
    /// One writer, no readers.
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// A held lock on a reference store.
///
/// The lock is automatically released when this guard is dropped, even if
/// the operation holding it fails or panics.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    mode: LockMode,
    /// When this is Some, we hold the lock.
    file: Option<File>,
}

impl StoreLock {
    /// Attempt to acquire the lock without waiting.
    ///
    /// Uses OS-level file locking via `fs2`, which works across processes.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] if a conflicting lock is held
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock cannot be acquired
    pub fn acquire(paths: &StorePaths, mode: LockMode) -> Result<Self, LockError> {
        let parent = paths.parent_dir();
        fs::create_dir_all(&parent).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", parent.display(), e))
        })?;

        let path = paths.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        let attempt = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };

        match attempt {
            Ok(()) => Ok(Self {
                path,
                mode,
                file: Some(file),
            }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::AlreadyLocked { path })
            }
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Try to acquire the lock, returning None if it is contended.
    pub fn try_acquire(paths: &StorePaths, mode: LockMode) -> Result<Option<Self>, LockError> {
        match Self::acquire(paths, mode) {
            Ok(lock) => Ok(Some(lock)),
            Err(LockError::AlreadyLocked { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Acquire the lock, polling until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] if the lock stays contended for `timeout`
    /// - [`LockError::Cancelled`] if `cancel` fires while waiting
    pub async fn acquire_within(
        paths: &StorePaths,
        mode: LockMode,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, LockError> {
        let started = Instant::now();
        let mut poll = INITIAL_POLL;
        let mut announced = false;

        loop {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled {
                    path: paths.lock_path(),
                });
            }

            if let Some(lock) = Self::try_acquire(paths, mode)? {
                debug!(path = %lock.path.display(), %mode, waited = ?started.elapsed(), "store lock acquired");
                return Ok(lock);
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: paths.lock_path(),
                    mode,
                    waited,
                });
            }

            if !announced {
                info!(path = %paths.lock_path().display(), %mode, "waiting for store lock held by another job");
                announced = true;
            }

            let sleep = poll.min(timeout - waited);
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(LockError::Cancelled { path: paths.lock_path() });
                }
                () = tokio::time::sleep(sleep) => {}
            }
            poll = (poll * 2).min(MAX_POLL);
        }
    }

    /// Check if the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// The lock mode.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly.
    ///
    /// This is called automatically on drop.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            FileExt::unlock(&file).map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
            debug!(path = %self.path.display(), mode = %self.mode, "store lock released");
        }
        Ok(())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Best-effort release on drop - ignore errors since we're dropping
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}
