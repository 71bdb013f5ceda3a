//! workspace::clean
//!
//! Restores a workspace to pristine state before materialization: index
//! and tracked files reset to HEAD, untracked and ignored files deleted.
//! The `.git` directory is never touched.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use super::{Workspace, WorkspaceError};
use crate::git::{Git, GitError};

/// What the cleaner did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Whether tracked files were reset to HEAD
    pub reset: bool,
    /// Removed untracked and ignored paths, relative to the workspace
    pub removed: Vec<PathBuf>,
}

/// Reset tracked files and delete untracked and ignored files.
///
/// A target that is not yet a workspace repository, or one whose HEAD is
/// still unborn, is left alone. Paths registered with
/// [`Workspace::keeping`] are never removed.
///
/// # Errors
///
/// [`WorkspaceError::HeadUnavailable`] if HEAD names a commit that cannot
/// be read, for example because the store alternate is gone.
#[instrument(skip_all, fields(path = %workspace.path().display()))]
pub fn clean(workspace: &Workspace) -> Result<CleanReport, WorkspaceError> {
    let git = match Git::open_workspace(workspace.path()) {
        Ok(git) => git,
        Err(GitError::NotARepo { .. }) => {
            debug!("not a workspace repository, nothing to clean");
            return Ok(CleanReport::default());
        }
        Err(e) => return Err(e.into()),
    };
    clean_repository(workspace, &git)
}

/// [`clean`] on an already opened workspace repository.
pub(super) fn clean_repository(workspace: &Workspace, git: &Git) -> Result<CleanReport, WorkspaceError> {
    if git.try_head_oid()?.is_none() {
        if !git.head_is_unborn()? {
            return Err(WorkspaceError::HeadUnavailable {
                path: workspace.path().to_path_buf(),
            });
        }
        debug!("no commit checked out, nothing to clean");
        return Ok(CleanReport::default());
    }

    git.reset_hard()?;

    let mut removed = Vec::new();
    for relative in git.untracked_paths()? {
        if relative.components().next().map(|c| c.as_os_str()) == Some(std::ffi::OsStr::new(".git")) {
            continue;
        }
        let path = workspace.path().join(&relative);
        if workspace.is_kept(&path) {
            warn!(path = %path.display(), "leaving kept path in place");
            continue;
        }
        let result = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => Err(e),
        };
        result.map_err(|source| WorkspaceError::Io {
            action: "cannot remove",
            path: path.clone(),
            source,
        })?;
        removed.push(relative);
    }

    info!(removed = removed.len(), "workspace cleaned");
    Ok(CleanReport {
        reset: true,
        removed,
    })
}
