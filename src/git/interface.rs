//! git::interface
//!
//! Git interface implementation using git2.
//!
//! This module provides the **single doorway** to in-process Git access:
//! opening stores and workspaces, reading and writing refs, resolving
//! object prefixes, wiring up alternates, and checking out trees. Network
//! transfer is not done here; see [`super::transport`].
//!
//! # Architecture
//!
//! The `Git` struct is the only way to read or modify a repository on disk.
//! No other module imports `git2` directly. This ensures:
//!
//! - Consistent error handling across all Git operations
//! - Strong type guarantees at the boundary
//! - Workspace opens never discover a parent repository by accident
//!
//! # Error Handling
//!
//! Git errors are categorized into typed variants:
//! - [`GitError::NotARepo`]: Path is not a repository of the expected kind
//! - [`GitError::RefNotFound`]: Requested ref does not exist
//! - [`GitError::ObjectNotFound`]: Requested object is not in the odb
//! - [`GitError::Io`]: Filesystem failure with the path involved
//!
//! # Example
//!
//! ```ignore
//! use refcheckout::git::Git;
//! use std::path::Path;
//!
//! let store = Git::open_bare(Path::new("/cache/widget.git"))?;
//! let oid = store.resolve_ref("refs/heads/main")?;
//! println!("main is at {}", oid.short(7));
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::{Oid, RefName, TypeError};

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Path is not a repository of the expected kind.
    #[error("not a {expected} git repository: {}", path.display())]
    NotARepo {
        /// The path that was opened
        path: PathBuf,
        /// "bare" or "non-bare"
        expected: &'static str,
    },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound {
        /// The ref that was not found
        refname: String,
    },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound {
        /// The OID that was not found
        oid: String,
    },

    /// Invalid object id format.
    #[error("invalid object id: {oid}")]
    InvalidOid {
        /// The invalid OID string
        oid: String,
    },

    /// Invalid ref name format.
    #[error("invalid ref name: {message}")]
    InvalidRefName {
        /// Description of the problem
        message: String,
    },

    /// Permission or locking error inside the repository.
    #[error("repository access error: {message}")]
    AccessError {
        /// Description of the error
        message: String,
    },

    /// Filesystem error outside of libgit2.
    #[error("{action} {}: {source}", path.display())]
    Io {
        /// What was being done
        action: &'static str,
        /// The path involved
        path: PathBuf,
        source: std::io::Error,
    },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => {
                if context.starts_with("refs/") || context == "HEAD" {
                    GitError::RefNotFound {
                        refname: context.to_string(),
                    }
                } else {
                    GitError::ObjectNotFound {
                        oid: context.to_string(),
                    }
                }
            }
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: context.to_string(),
            },
            git2::ErrorCode::Locked => GitError::AccessError {
                message: format!("repository is locked: {}", err.message()),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }

    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        GitError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => GitError::RefNotFound {
                refname: err.message().to_string(),
            },
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: err.message().to_string(),
            },
            _ => GitError::Internal {
                message: err.message().to_string(),
            },
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidOid(msg) => GitError::InvalidOid { oid: msg },
            TypeError::InvalidRefName(msg) => GitError::InvalidRefName { message: msg },
            TypeError::InvalidIdentity(msg) => GitError::Internal { message: msg },
        }
    }
}

/// A ref with its name and direct target OID.
///
/// Used when enumerating refs in a namespace. The OID is the ref's own
/// target, so annotated tags report the tag object, not the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    /// The full ref name
    pub name: RefName,
    /// The OID the ref points to
    pub oid: Oid,
}

/// Result of looking up an abbreviated object id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixMatch {
    /// No object has this prefix.
    None,
    /// Exactly one object; carries the commit it peels to, if any.
    Unique { object: Oid, commit: Option<Oid> },
    /// Several objects share the prefix (sorted).
    Ambiguous(Vec<Oid>),
}

/// Summary of working tree status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeStatus {
    /// Number of staged changes
    pub staged: usize,
    /// Number of unstaged changes to tracked files
    pub unstaged: usize,
    /// Number of untracked files
    pub untracked: usize,
    /// Number of ignored files
    pub ignored: usize,
}

impl WorktreeStatus {
    /// Tracked files match HEAD exactly.
    pub fn is_clean(&self) -> bool {
        self.staged == 0 && self.unstaged == 0
    }

    /// Nothing at all besides tracked files.
    pub fn is_pristine(&self) -> bool {
        self.is_clean() && self.untracked == 0 && self.ignored == 0
    }
}

/// The Git interface.
///
/// Wraps either a bare reference store or a workspace repository. No
/// other module imports `git2` directly.
pub struct Git {
    /// The underlying git2 repository
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .field("bare", &self.repo.is_bare())
            .finish()
    }
}

fn to_git2(oid: &Oid) -> Result<git2::Oid, GitError> {
    git2::Oid::from_str(oid.as_str()).map_err(|e| GitError::from_git2(e, oid.as_str()))
}

fn from_git2(oid: git2::Oid) -> Result<Oid, GitError> {
    Oid::new(oid.to_string()).map_err(GitError::from)
}

impl Git {
    // =========================================================================
    // Repository Opening and Info
    // =========================================================================

    /// Open the bare repository at exactly `path`.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if `path` is missing, not a repository, or
    ///   has a working directory
    pub fn open_bare(path: &Path) -> Result<Self, GitError> {
        let not_a_repo = || GitError::NotARepo {
            path: path.to_path_buf(),
            expected: "bare",
        };
        let repo = git2::Repository::open_bare(path).map_err(|_| not_a_repo())?;
        if !repo.is_bare() {
            return Err(not_a_repo());
        }
        Ok(Self { repo })
    }

    /// Open the workspace repository whose working directory is `path`.
    ///
    /// Parent directories are never searched, so a workspace nested inside
    /// another checkout is not mistaken for it.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if `path/.git` is not a repository
    pub fn open_workspace(path: &Path) -> Result<Self, GitError> {
        let not_a_repo = || GitError::NotARepo {
            path: path.to_path_buf(),
            expected: "non-bare",
        };
        let repo = git2::Repository::open_ext(
            path,
            git2::RepositoryOpenFlags::NO_SEARCH,
            std::iter::empty::<&std::ffi::OsStr>(),
        )
        .map_err(|_| not_a_repo())?;

        // Opening `path` must not land on a bare repo or a different root
        match repo.workdir() {
            Some(workdir) if same_dir(workdir, path) => Ok(Self { repo }),
            _ => Err(not_a_repo()),
        }
    }

    /// Create an empty workspace repository at `path`.
    pub fn init_workspace(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::init(path)
            .map_err(|e| GitError::from_git2(e, &path.display().to_string()))?;
        Ok(Self { repo })
    }

    /// Get direct access to the git directory path.
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// The working directory, `None` for bare repositories.
    pub fn work_dir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    // =========================================================================
    // Configuration and Remotes
    // =========================================================================

    /// Read a value from the repository's local config.
    pub fn config_get(&self, key: &str) -> Result<Option<String>, GitError> {
        let config = self.local_config()?;
        match config.get_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, key)),
        }
    }

    /// Write a value to the repository's local config.
    pub fn config_set(&self, key: &str, value: &str) -> Result<(), GitError> {
        let mut config = self.local_config()?;
        config
            .set_str(key, value)
            .map_err(|e| GitError::from_git2(e, key))
    }

    fn local_config(&self) -> Result<git2::Config, GitError> {
        self.repo
            .config()
            .and_then(|c| c.open_level(git2::ConfigLevel::Local))
            .map_err(|e| GitError::Internal {
                message: format!("cannot open repository config: {}", e.message()),
            })
    }

    /// Get the URL for a remote.
    pub fn remote_url(&self, name: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_remote(name) {
            Ok(remote) => Ok(remote.url().map(String::from)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::Internal {
                message: e.message().to_string(),
            }),
        }
    }

    /// Create the remote, or point it at `url` if it exists.
    pub fn set_remote_url(&self, name: &str, url: &str) -> Result<(), GitError> {
        if self.remote_url(name)?.is_some() {
            self.repo
                .remote_set_url(name, url)
                .map_err(|e| GitError::from_git2(e, name))?;
        } else {
            self.repo
                .remote(name, url)
                .map_err(|e| GitError::from_git2(e, name))?;
        }
        Ok(())
    }

    // =========================================================================
    // HEAD
    // =========================================================================

    /// Get HEAD commit OID.
    ///
    /// # Errors
    ///
    /// - [`GitError::RefNotFound`] if HEAD is unborn (new repository)
    pub fn head_oid(&self) -> Result<Oid, GitError> {
        let head = self
            .repo
            .head()
            .map_err(|e| GitError::from_git2(e, "HEAD"))?;

        let oid = head
            .peel_to_commit()
            .map_err(|e| GitError::from_git2(e, "HEAD"))?
            .id();

        from_git2(oid)
    }

    /// Get HEAD commit OID, or None if HEAD is unborn.
    pub fn try_head_oid(&self) -> Result<Option<Oid>, GitError> {
        match self.repo.head() {
            Ok(head) => match head.peel_to_commit() {
                Ok(commit) => from_git2(commit.id()).map(Some),
                Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
                Err(e) => Err(GitError::from_git2(e, "HEAD")),
            },
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(GitError::from_git2(e, "HEAD")),
        }
    }

    /// Whether HEAD names a branch that has no commit yet.
    pub fn head_is_unborn(&self) -> Result<bool, GitError> {
        match self.repo.head() {
            Ok(_) => Ok(false),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(true),
            Err(e) => Err(GitError::from_git2(e, "HEAD")),
        }
    }

    /// The ref HEAD points at, if HEAD is symbolic.
    pub fn head_symbolic_target(&self) -> Result<Option<RefName>, GitError> {
        let head = self
            .repo
            .find_reference("HEAD")
            .map_err(|e| GitError::from_git2(e, "HEAD"))?;
        match head.symbolic_target() {
            Some(target) => Ok(Some(RefName::new(target)?)),
            None => Ok(None),
        }
    }

    /// Point HEAD at `target`, which need not exist yet.
    pub fn set_head_symbolic(&self, target: &RefName) -> Result<(), GitError> {
        self.repo
            .set_head(target.as_str())
            .map_err(|e| GitError::from_git2(e, target.as_str()))
    }

    // =========================================================================
    // Ref Resolution
    // =========================================================================

    /// Resolve a ref to its target commit.
    ///
    /// This peels through symbolic refs and tags to get the commit OID.
    ///
    /// # Errors
    ///
    /// - [`GitError::RefNotFound`] if the ref doesn't exist
    pub fn resolve_ref(&self, refname: &str) -> Result<Oid, GitError> {
        let reference = self
            .repo
            .find_reference(refname)
            .map_err(|e| GitError::from_git2(e, refname))?;

        let oid = reference
            .peel_to_commit()
            .map_err(|e| GitError::from_git2(e, refname))?
            .id();

        from_git2(oid)
    }

    /// Resolve a ref, returning None if it doesn't exist.
    pub fn try_resolve_ref(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        match self.resolve_ref(refname) {
            Ok(oid) => Ok(Some(oid)),
            Err(GitError::RefNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check if a ref exists.
    pub fn ref_exists(&self, refname: &str) -> bool {
        self.repo.find_reference(refname).is_ok()
    }

    /// List all direct refs matching a prefix.
    ///
    /// Symbolic refs and refs with invalid names are skipped.
    pub fn list_refs_by_prefix(&self, prefix: &str) -> Result<Vec<RefEntry>, GitError> {
        let pattern = format!("{}*", prefix);
        let refs = self
            .repo
            .references_glob(&pattern)
            .map_err(|e| GitError::Internal {
                message: e.message().to_string(),
            })?;

        let mut entries = Vec::new();
        for reference in refs {
            let reference = reference.map_err(|e| GitError::Internal {
                message: e.message().to_string(),
            })?;

            let (Some(name), Some(target)) = (reference.name(), reference.target()) else {
                continue;
            };
            let Ok(name) = RefName::new(name) else {
                continue;
            };

            entries.push(RefEntry {
                name,
                oid: from_git2(target)?,
            });
        }

        entries.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(entries)
    }

    /// Create or overwrite a ref.
    pub fn update_ref(&self, refname: &RefName, oid: &Oid, message: &str) -> Result<(), GitError> {
        self.repo
            .reference(refname.as_str(), to_git2(oid)?, true, message)
            .map_err(|e| GitError::from_git2(e, refname.as_str()))?;
        Ok(())
    }

    /// Delete a ref. Deleting a missing ref is not an error.
    pub fn delete_ref(&self, refname: &RefName) -> Result<(), GitError> {
        match self.repo.find_reference(refname.as_str()) {
            Ok(mut reference) => reference
                .delete()
                .map_err(|e| GitError::from_git2(e, refname.as_str())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(e) => Err(GitError::from_git2(e, refname.as_str())),
        }
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Look up an abbreviated object id (at least 4 hex digits).
    ///
    /// When the prefix is ambiguous, every matching object is listed. That
    /// requires a walk of the object database, which only happens on the
    /// error path.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<PrefixMatch, GitError> {
        let prefix = prefix.to_ascii_lowercase();
        match self.repo.find_object_by_prefix(&prefix, None) {
            Ok(object) => {
                let commit = match object.peel_to_commit() {
                    Ok(commit) => Some(from_git2(commit.id())?),
                    Err(_) => None,
                };
                Ok(PrefixMatch::Unique {
                    object: from_git2(object.id())?,
                    commit,
                })
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(PrefixMatch::None),
            Err(e) if e.code() == git2::ErrorCode::Ambiguous => {
                Ok(PrefixMatch::Ambiguous(self.objects_with_prefix(&prefix)?))
            }
            Err(e) if e.code() == git2::ErrorCode::InvalidSpec => Ok(PrefixMatch::None),
            Err(e) => Err(GitError::from_git2(e, &prefix)),
        }
    }

    fn objects_with_prefix(&self, prefix: &str) -> Result<Vec<Oid>, GitError> {
        let odb = self.repo.odb()?;
        let mut found = Vec::new();
        odb.foreach(|oid| {
            let hex = oid.to_string();
            if hex.starts_with(prefix) {
                found.push(hex);
            }
            true
        })?;

        let mut candidates = found
            .into_iter()
            .map(Oid::new)
            .collect::<Result<Vec<_>, _>>()?;
        candidates.sort();
        candidates.dedup();
        Ok(candidates)
    }

    /// Check whether `oid` names a commit reachable through this odb,
    /// alternates included.
    pub fn has_commit(&self, oid: &Oid) -> bool {
        to_git2(oid)
            .ok()
            .and_then(|oid| self.repo.find_commit(oid).ok())
            .is_some()
    }

    // =========================================================================
    // Alternates
    // =========================================================================

    /// Make `objects_dir` an alternate object store of this repository.
    ///
    /// The entry is persisted in `objects/info/alternates` and registered on
    /// the open handle. Returns true if the file had to be written.
    pub fn ensure_alternate(&self, objects_dir: &Path) -> Result<bool, GitError> {
        let info_dir = self.repo.path().join("objects").join("info");
        let alternates = info_dir.join("alternates");
        let line = objects_dir.to_string_lossy().into_owned();

        let existing = match fs::read_to_string(&alternates) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(GitError::io("cannot read", &alternates, e)),
        };
        let present = existing.lines().any(|l| l.trim() == line);

        if !present {
            fs::create_dir_all(&info_dir)
                .map_err(|e| GitError::io("cannot create", &info_dir, e))?;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&alternates)
                .map_err(|e| GitError::io("cannot open", &alternates, e))?;
            let separator = if existing.is_empty() || existing.ends_with('\n') {
                ""
            } else {
                "\n"
            };
            writeln!(file, "{separator}{line}")
                .map_err(|e| GitError::io("cannot write", &alternates, e))?;
        }

        self.repo
            .odb()?
            .add_disk_alternate(&line)
            .map_err(|e| GitError::from_git2(e, &line))?;

        Ok(!present)
    }

    // =========================================================================
    // Working Tree
    // =========================================================================

    /// Check out `oid` with a detached HEAD.
    ///
    /// Tracked files are forced to the commit's content and files tracked by
    /// the previous HEAD but absent from `oid` are removed. Untracked files
    /// are left alone.
    pub fn checkout_detached(&self, oid: &Oid) -> Result<(), GitError> {
        let target = to_git2(oid)?;
        let commit = self
            .repo
            .find_commit(target)
            .map_err(|e| GitError::from_git2(e, oid.as_str()))?;

        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut checkout))
            .map_err(|e| GitError::from_git2(e, oid.as_str()))?;
        self.repo
            .set_head_detached(target)
            .map_err(|e| GitError::from_git2(e, oid.as_str()))?;
        Ok(())
    }

    /// Reset index and tracked files to HEAD. A no-op on an unborn HEAD.
    pub fn reset_hard(&self) -> Result<(), GitError> {
        let Some(head) = self.try_head_oid()? else {
            return Ok(());
        };
        let commit = self.repo.find_commit(to_git2(&head)?)?;
        self.repo
            .reset(commit.as_object(), git2::ResetType::Hard, None)
            .map_err(|e| GitError::from_git2(e, head.as_str()))
    }

    /// Untracked and ignored paths, relative to the working directory.
    ///
    /// Directories that contain nothing tracked are reported once, with a
    /// trailing `/`, instead of file by file.
    pub fn untracked_paths(&self) -> Result<Vec<PathBuf>, GitError> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(true)
            .recurse_untracked_dirs(false)
            .recurse_ignored_dirs(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        let mut paths = Vec::new();
        for entry in statuses.iter() {
            let status = entry.status();
            if status.is_wt_new() || status.is_ignored() {
                if let Some(path) = entry.path() {
                    paths.push(PathBuf::from(path));
                }
            }
        }
        Ok(paths)
    }

    /// Get working tree status summary.
    pub fn worktree_status(&self) -> Result<WorktreeStatus, GitError> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(true)
            .recurse_untracked_dirs(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        let mut result = WorktreeStatus::default();

        for entry in statuses.iter() {
            let status = entry.status();

            if status.is_index_new()
                || status.is_index_modified()
                || status.is_index_deleted()
                || status.is_index_renamed()
                || status.is_index_typechange()
            {
                result.staged += 1;
            }

            if status.is_wt_modified()
                || status.is_wt_deleted()
                || status.is_wt_renamed()
                || status.is_wt_typechange()
            {
                result.unstaged += 1;
            }

            if status.is_wt_new() {
                result.untracked += 1;
            }
            if status.is_ignored() {
                result.ignored += 1;
            }
        }

        Ok(result)
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.components().eq(b.components()),
    }
}
