//! workspace
//!
//! Workspace materialization.
//!
//! # Architecture
//!
//! A workspace is an ordinary non-bare repository at the target directory
//! whose object database borrows from the reference store through
//! `objects/info/alternates`. Materializing brings it to a resolved commit:
//!
//! 1. Classify the target ([`WorkspaceState`])
//! 2. Create it, reuse it, or (with `clean`) recreate it
//! 3. Mirror the store's branches into `refs/remotes/origin/*` and its tags
//!    into `refs/tags/*`
//! 4. Fetch the commit from the store only if the alternate cannot reach it
//! 5. Check out the commit with a detached HEAD
//!
//! The workspace records which repository it belongs to in its own config
//! (`refcheckout.identity`), so a target directory reused by a different
//! pipeline is detected instead of silently mixing histories.
//!
//! # Invariants
//!
//! - Only the target directory is written; the store is read only, and
//!   paths registered with [`Workspace::keeping`] are never removed
//! - After success, every tracked file equals the commit's tree
//! - Untracked files survive unless the cleaner ran

pub mod clean;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::paths::WorkspacePaths;
use crate::core::types::{Oid, RefName, RepositoryIdentity};
use crate::git::{Git, GitError, RunContext, Transport, TransportError};
use crate::resolve::ResolvedCommit;
use crate::store::StoreHandle;

pub use clean::{clean, CleanReport};

/// Workspace config key holding the repository identity.
pub const IDENTITY_KEY: &str = "refcheckout.identity";

const SYNC_MESSAGE: &str = "refcheckout: sync from reference store";

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The target holds something other than this repository.
    #[error("workspace {} belongs to {found}, not '{expected}' (pass --clean to replace it)", path.display())]
    IdentityMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// The commit could not be copied from the store.
    #[error("cannot fetch {oid} from the reference store: {source}")]
    Fetch { oid: Oid, source: TransportError },

    /// The commit is neither reachable nor fetchable.
    #[error("commit {oid} is not available in the reference store")]
    MissingCommit { oid: Oid },

    /// HEAD names a commit that no reachable object store holds.
    #[error("cannot clean {}: its HEAD commit is missing from the workspace and the reference store", path.display())]
    HeadUnavailable { path: PathBuf },

    #[error("workspace update cancelled")]
    Cancelled,

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// A blocking worker failed to complete.
    #[error("workspace task failed: {0}")]
    Task(String),
}

impl WorkspaceError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Who a workspace repository says it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Recorded identity
    Identity(String),
    /// No identity recorded, but an `origin` remote
    Origin(String),
    /// Neither
    Unknown,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Identity(id) => write!(f, "'{id}'"),
            Owner::Origin(url) => write!(f, "a clone of {url}"),
            Owner::Unknown => write!(f, "an unidentified repository"),
        }
    }
}

/// What the target directory currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceState {
    /// Path does not exist.
    Missing,
    /// Empty directory, or a bare `git init` left by an interrupted run.
    Empty,
    /// A workspace repository.
    Repository { owner: Owner },
    /// A file or a non-empty directory that is not a repository.
    Foreign,
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceState::Missing => write!(f, "missing"),
            WorkspaceState::Empty => write!(f, "empty"),
            WorkspaceState::Repository { owner } => write!(f, "{owner}"),
            WorkspaceState::Foreign => write!(f, "files that are not a git repository"),
        }
    }
}

/// A target directory for a given repository.
#[derive(Debug, Clone)]
pub struct Workspace {
    paths: WorkspacePaths,
    identity: RepositoryIdentity,
    remote_url: String,
    keep: Vec<PathBuf>,
}

impl Workspace {
    pub fn new(
        path: impl Into<PathBuf>,
        identity: RepositoryIdentity,
        remote_url: impl Into<String>,
    ) -> Self {
        Self {
            paths: WorkspacePaths::new(path),
            identity,
            remote_url: remote_url.into(),
            keep: Vec::new(),
        }
    }

    /// Never remove `path` or any directory containing it (builder style).
    pub fn keeping(mut self, path: impl Into<PathBuf>) -> Self {
        self.keep.push(path.into());
        self
    }

    /// Whether removing `path` would take a kept path with it.
    pub fn is_kept(&self, path: &Path) -> bool {
        self.keep.iter().any(|kept| kept.starts_with(path))
    }

    pub fn path(&self) -> &Path {
        self.paths.work_dir()
    }

    pub fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    /// Whether `owner` is this workspace's repository.
    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        match owner {
            Owner::Identity(id) => id == self.identity.as_str(),
            Owner::Origin(url) => url == &self.remote_url,
            Owner::Unknown => false,
        }
    }

    /// Classify the target directory.
    pub fn state(&self) -> Result<WorkspaceState, WorkspaceError> {
        let path = self.path();
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WorkspaceState::Missing)
            }
            Err(e) => return Err(WorkspaceError::io("cannot inspect", path, e)),
        };
        if !meta.is_dir() {
            return Ok(WorkspaceState::Foreign);
        }

        let entries = fs::read_dir(path)
            .map_err(|e| WorkspaceError::io("cannot list", path, e))?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect::<Vec<_>>();
        if entries.is_empty() {
            return Ok(WorkspaceState::Empty);
        }

        let git = match Git::open_workspace(path) {
            Ok(git) => git,
            Err(GitError::NotARepo { .. }) => return Ok(WorkspaceState::Foreign),
            Err(e) => return Err(e.into()),
        };

        let owner = if let Some(id) = git.config_get(IDENTITY_KEY)? {
            Owner::Identity(id)
        } else if let Some(url) = git.remote_url("origin")? {
            Owner::Origin(url)
        } else {
            Owner::Unknown
        };

        // `git init` and nothing else: an interrupted create
        if owner == Owner::Unknown && entries.len() == 1 && git.try_head_oid()?.is_none() {
            return Ok(WorkspaceState::Empty);
        }

        Ok(WorkspaceState::Repository { owner })
    }

    fn open(&self) -> Result<Git, WorkspaceError> {
        Ok(Git::open_workspace(self.path())?)
    }
}

/// What materialization did to the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeAction {
    /// New workspace
    Created,
    /// Existing workspace moved to the commit
    Updated,
    /// Already at the commit with tracked files intact
    Unchanged,
    /// Foreign contents removed and workspace created
    Recreated,
}

impl fmt::Display for MaterializeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterializeAction::Created => write!(f, "created"),
            MaterializeAction::Updated => write!(f, "updated"),
            MaterializeAction::Unchanged => write!(f, "unchanged"),
            MaterializeAction::Recreated => write!(f, "recreated"),
        }
    }
}

/// Result of [`Materializer::materialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeResult {
    pub path: PathBuf,
    pub commit: Oid,
    /// HEAD before this run, if there was one
    pub previous: Option<Oid>,
    pub action: MaterializeAction,
    /// Present when the cleaner ran
    pub cleaned: Option<CleanReport>,
}

/// Outcome of the blocking preparation phase.
#[derive(Debug)]
struct Prepared {
    action: MaterializeAction,
    previous: Option<Oid>,
    cleaned: Option<CleanReport>,
    has_commit: bool,
}

/// Brings workspaces to a resolved commit.
pub struct Materializer {
    transport: Arc<dyn Transport>,
    fetch_timeout: Duration,
}

impl fmt::Debug for Materializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Materializer")
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl Materializer {
    pub fn new(transport: Arc<dyn Transport>, fetch_timeout: Duration) -> Self {
        Self {
            transport,
            fetch_timeout,
        }
    }

    /// Bring `workspace` to `commit`, borrowing objects from `store`.
    ///
    /// With `clean`, this repository's workspace is cleaned once its store
    /// alternate is in place, and a workspace that belongs to another
    /// repository is emptied and recreated instead of rejected.
    ///
    /// # Errors
    ///
    /// - [`WorkspaceError::IdentityMismatch`] if the target belongs to
    ///   another repository and `clean` is false
    /// - [`WorkspaceError::Cancelled`] if `cancel` fires between phases
    #[instrument(skip_all, fields(path = %workspace.path().display(), commit = %commit.oid))]
    pub async fn materialize(
        &self,
        workspace: &Workspace,
        commit: &ResolvedCommit,
        store: &StoreHandle,
        clean: bool,
        cancel: &CancellationToken,
    ) -> Result<MaterializeResult, WorkspaceError> {
        let oid = commit.oid.clone();

        let prepared = {
            let workspace = workspace.clone();
            let store_dir = store.path().to_path_buf();
            let store_objects = store.paths.objects_dir();
            let oid = oid.clone();
            blocking(move || prepare(&workspace, &store_dir, &store_objects, &oid, clean)).await?
        };
        debug!(?prepared, "workspace prepared");

        if !prepared.has_commit {
            if cancel.is_cancelled() {
                return Err(WorkspaceError::Cancelled);
            }
            info!("commit not reachable through the store alternate, fetching it");
            let ctx = RunContext::new(cancel.clone(), self.fetch_timeout);
            self.transport
                .fetch_commit(workspace.path(), store.path(), &oid, &ctx)
                .await
                .map_err(|e| match e {
                    TransportError::Cancelled { .. } => WorkspaceError::Cancelled,
                    source => WorkspaceError::Fetch {
                        oid: oid.clone(),
                        source,
                    },
                })?;
        }

        if cancel.is_cancelled() {
            return Err(WorkspaceError::Cancelled);
        }

        let changed = {
            let workspace = workspace.clone();
            let oid = oid.clone();
            blocking(move || checkout(&workspace, &oid)).await?
        };

        let action = match prepared.action {
            MaterializeAction::Updated if !changed => MaterializeAction::Unchanged,
            action => action,
        };
        info!(%action, "workspace ready");

        Ok(MaterializeResult {
            path: workspace.path().to_path_buf(),
            commit: oid,
            previous: prepared.previous,
            action,
            cleaned: prepared.cleaned,
        })
    }
}

async fn blocking<T, F>(f: F) -> Result<T, WorkspaceError>
where
    F: FnOnce() -> Result<T, WorkspaceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkspaceError::Task(e.to_string()))?
}

fn prepare(
    workspace: &Workspace,
    store_dir: &Path,
    store_objects: &Path,
    oid: &Oid,
    clean: bool,
) -> Result<Prepared, WorkspaceError> {
    let state = workspace.state()?;
    debug!(%state, "workspace state");

    let mut cleaned = None;
    let (git, action, previous) = match state {
        WorkspaceState::Missing | WorkspaceState::Empty => {
            (create(workspace, store_objects)?, MaterializeAction::Created, None)
        }
        WorkspaceState::Repository { owner } if workspace.is_owned_by(&owner) => {
            let git = workspace.open()?;
            if git.ensure_alternate(store_objects)? {
                info!("restored missing reference store alternate");
            }
            if matches!(owner, Owner::Origin(_)) {
                info!("adopting existing clone");
                git.config_set(IDENTITY_KEY, workspace.identity().as_str())?;
            }
            let previous = git.try_head_oid()?;
            // Only after the alternate is back can HEAD be read and reset.
            if clean {
                cleaned = Some(clean::clean_repository(workspace, &git)?);
            }
            (git, MaterializeAction::Updated, previous)
        }
        other => {
            if !clean {
                return Err(WorkspaceError::IdentityMismatch {
                    path: workspace.path().to_path_buf(),
                    expected: workspace.identity().to_string(),
                    found: other.to_string(),
                });
            }
            warn!(found = %other, "workspace holds something else, recreating");
            let previous = workspace
                .open()
                .ok()
                .and_then(|git| git.try_head_oid().ok().flatten());
            wipe(workspace)?;
            (
                create(workspace, store_objects)?,
                MaterializeAction::Recreated,
                previous,
            )
        }
    };

    let store = Git::open_bare(store_dir)?;
    mirror_refs(&store, &git)?;

    Ok(Prepared {
        action,
        previous,
        cleaned,
        has_commit: git.has_commit(oid),
    })
}

/// Initialize a workspace repository wired to the store.
fn create(workspace: &Workspace, store_objects: &Path) -> Result<Git, WorkspaceError> {
    let path = workspace.path();
    fs::create_dir_all(path).map_err(|e| WorkspaceError::io("cannot create", path, e))?;

    let git = Git::init_workspace(path)?;
    git.config_set(IDENTITY_KEY, workspace.identity().as_str())?;
    git.set_remote_url("origin", &workspace.remote_url)?;
    git.ensure_alternate(store_objects)?;
    Ok(git)
}

/// Remove everything inside the target, keeping the directory itself and
/// anything the workspace was told to keep.
fn wipe(workspace: &Workspace) -> Result<(), WorkspaceError> {
    let path = workspace.path();
    let meta = fs::metadata(path).map_err(|e| WorkspaceError::io("cannot inspect", path, e))?;
    if !meta.is_dir() {
        if workspace.is_kept(path) {
            return Err(WorkspaceError::io(
                "refusing to remove",
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "path is kept"),
            ));
        }
        return fs::remove_file(path).map_err(|e| WorkspaceError::io("cannot remove", path, e));
    }

    let entries = fs::read_dir(path).map_err(|e| WorkspaceError::io("cannot list", path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| WorkspaceError::io("cannot list", path, e))?;
        let entry_path = entry.path();
        if workspace.is_kept(&entry_path) {
            warn!(path = %entry_path.display(), "leaving kept path in place");
            continue;
        }
        let is_dir = entry
            .file_type()
            .map_err(|e| WorkspaceError::io("cannot inspect", &entry_path, e))?
            .is_dir();
        let removed = if is_dir {
            fs::remove_dir_all(&entry_path)
        } else {
            fs::remove_file(&entry_path)
        };
        removed.map_err(|e| WorkspaceError::io("cannot remove", &entry_path, e))?;
    }
    Ok(())
}

fn mirror_refs(store: &Git, workspace: &Git) -> Result<(), WorkspaceError> {
    mirror_namespace(store, workspace, "refs/heads/", "refs/remotes/origin/")?;
    mirror_namespace(store, workspace, "refs/tags/", "refs/tags/")?;
    Ok(())
}

/// Make the refs under `to` in the workspace equal the store's refs under
/// `from`.
fn mirror_namespace(store: &Git, workspace: &Git, from: &str, to: &str) -> Result<(), WorkspaceError> {
    let mut wanted = std::collections::BTreeMap::new();
    for entry in store.list_refs_by_prefix(from)? {
        if let Some(rest) = entry.name.strip_prefix(from) {
            wanted.insert(format!("{to}{rest}"), entry.oid);
        }
    }

    let mut current = std::collections::BTreeMap::new();
    for entry in workspace.list_refs_by_prefix(to)? {
        if !wanted.contains_key(entry.name.as_str()) {
            workspace.delete_ref(&entry.name)?;
        } else {
            current.insert(entry.name.as_str().to_string(), entry.oid);
        }
    }

    let mut updated = 0usize;
    for (name, oid) in &wanted {
        if current.get(name) == Some(oid) {
            continue;
        }
        let refname = RefName::new(name.as_str()).map_err(GitError::from)?;
        workspace.update_ref(&refname, oid, SYNC_MESSAGE)?;
        updated += 1;
    }
    debug!(namespace = to, total = wanted.len(), updated, "mirrored refs");
    Ok(())
}

/// Detach HEAD at `oid`. Returns false if nothing had to change.
fn checkout(workspace: &Workspace, oid: &Oid) -> Result<bool, WorkspaceError> {
    let git = workspace.open()?;
    if !git.has_commit(oid) {
        return Err(WorkspaceError::MissingCommit { oid: oid.clone() });
    }

    let at_commit = git.try_head_oid()?.as_ref() == Some(oid);
    let detached = git.head_symbolic_target()?.is_none();
    if at_commit && detached && git.worktree_status()?.is_clean() {
        debug!("already at commit");
        return Ok(false);
    }

    git.checkout_detached(oid)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(path: &Path) -> Workspace {
        Workspace::new(
            path,
            RepositoryIdentity::new("acme/widget").unwrap(),
            "https://example.com/acme/widget.git",
        )
    }

    #[test]
    fn missing_and_empty() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp.path().join("ws"));
        assert_eq!(ws.state().unwrap(), WorkspaceState::Missing);

        fs::create_dir(ws.path()).unwrap();
        assert_eq!(ws.state().unwrap(), WorkspaceState::Empty);
    }

    #[test]
    fn plain_files_are_foreign() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("notes.txt"), "x").unwrap();
        assert_eq!(workspace(temp.path()).state().unwrap(), WorkspaceState::Foreign);

        let file = temp.path().join("notes.txt");
        assert_eq!(workspace(&file).state().unwrap(), WorkspaceState::Foreign);
    }

    #[test]
    fn bare_init_counts_as_empty() {
        let temp = TempDir::new().unwrap();
        Git::init_workspace(temp.path()).unwrap();
        assert_eq!(workspace(temp.path()).state().unwrap(), WorkspaceState::Empty);
    }

    #[test]
    fn recorded_identity_wins_over_origin() {
        let temp = TempDir::new().unwrap();
        let git = Git::init_workspace(temp.path()).unwrap();
        git.set_remote_url("origin", "https://example.com/acme/widget.git")
            .unwrap();
        git.config_set(IDENTITY_KEY, "acme/other").unwrap();

        let ws = workspace(temp.path());
        let state = ws.state().unwrap();
        assert_eq!(
            state,
            WorkspaceState::Repository {
                owner: Owner::Identity("acme/other".into())
            }
        );
        match state {
            WorkspaceState::Repository { owner } => assert!(!ws.is_owned_by(&owner)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn origin_url_identifies_existing_clone() {
        let temp = TempDir::new().unwrap();
        let git = Git::init_workspace(temp.path()).unwrap();
        git.set_remote_url("origin", "https://example.com/acme/widget.git")
            .unwrap();

        let ws = workspace(temp.path());
        match ws.state().unwrap() {
            WorkspaceState::Repository { owner } => {
                assert_eq!(owner, Owner::Origin("https://example.com/acme/widget.git".into()));
                assert!(ws.is_owned_by(&owner));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn wipe_keeps_directory() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/b/c"), "x").unwrap();
        fs::write(temp.path().join("d"), "x").unwrap();

        wipe(&workspace(temp.path())).unwrap();
        assert!(temp.path().is_dir());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn wipe_leaves_kept_paths() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("cache/acme/widget.git");
        fs::create_dir_all(&store).unwrap();
        fs::write(store.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(temp.path().join("notes.txt"), "x").unwrap();

        let ws = workspace(temp.path()).keeping(&store);
        assert!(ws.is_kept(temp.path()));
        assert!(ws.is_kept(&temp.path().join("cache")));
        assert!(!ws.is_kept(&temp.path().join("notes.txt")));

        wipe(&ws).unwrap();
        assert!(store.join("HEAD").is_file());
        assert!(!temp.path().join("notes.txt").exists());
    }

    #[test]
    fn mismatch_message_suggests_clean() {
        let err = WorkspaceError::IdentityMismatch {
            path: PathBuf::from("/builds/job"),
            expected: "acme/widget".into(),
            found: Owner::Identity("acme/other".into()).to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'acme/other'"));
        assert!(msg.contains("--clean"));
    }
}
