//! store
//!
//! Reference store manager.
//!
//! # Architecture
//!
//! A reference store is a bare mirror of one remote repository, shared by
//! every job on the host. [`StoreManager::ensure`] brings it up to date:
//!
//! - **Create**: mirror-clone into a hidden staging sibling, write the sync
//!   state, rename onto the store path. A store path therefore holds either
//!   nothing or a complete mirror.
//! - **Update**: fetch all refs with pruning, then follow the remote's
//!   default branch.
//! - **Degrade**: if the remote cannot be reached but a valid store exists,
//!   return it marked [`Freshness::Stale`].
//!
//! Objects are never deleted from a store (`gc.auto=0`), since workspaces
//! borrow them through alternates.
//!
//! # Invariants
//!
//! - Callers hold the exclusive store lock for the whole of `ensure`
//! - A store is only ever used for the identity recorded in its sync state

mod state;

pub use state::{StateError, SyncState};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::config::Settings;
use crate::core::paths::StorePaths;
use crate::core::types::{RepositoryIdentity, UtcTimestamp};
use crate::git::{Git, GitError, RunContext, Transport, TransportError};

/// Errors from store management.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The remote could not be reached and there is no usable store.
    #[error("cannot reach {url} and no usable reference store exists at {}: {source}", path.display())]
    Unreachable {
        url: String,
        path: PathBuf,
        source: TransportError,
    },

    /// The store at this path mirrors a different repository.
    #[error("reference store {} belongs to '{found}', not '{expected}'", path.display())]
    IdentityMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// Cancelled while talking to the remote.
    #[error("store refresh cancelled")]
    Cancelled,

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Whether a store reflects the remote as of this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Synchronized during this run.
    Fresh,
    /// The refresh failed; contents are from an earlier run.
    Stale { reason: String },
}

/// A usable reference store, returned by [`StoreManager::ensure`].
#[derive(Debug, Clone)]
pub struct StoreHandle {
    pub paths: StorePaths,
    pub identity: RepositoryIdentity,
    pub remote_url: String,
    /// Last successful sync, `None` for an adopted store never synced by us
    pub last_synchronized: Option<UtcTimestamp>,
    pub freshness: Freshness,
    /// True when this run created the store
    pub created: bool,
}

impl StoreHandle {
    /// The bare mirror directory.
    pub fn path(&self) -> &Path {
        self.paths.store_dir()
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale { .. })
    }

    /// Open the store for reading.
    pub fn open(&self) -> Result<Git, GitError> {
        Git::open_bare(self.path())
    }
}

/// What was found at the store path.
enum Existing {
    /// Nothing there.
    Absent,
    /// Something unusable, to be replaced.
    Invalid(String),
    /// A valid store; the state is `None` when adopting a store created by
    /// another tool.
    Valid(Option<SyncState>),
}

#[derive(Clone, Copy)]
enum Transfer<'a> {
    Clone { url: &'a str, dest: &'a Path },
    Fetch { store: &'a Path, url: &'a str },
}

impl Transfer<'_> {
    fn name(&self) -> &'static str {
        match self {
            Transfer::Clone { .. } => "git clone",
            Transfer::Fetch { .. } => "git fetch",
        }
    }
}

/// Creates, refreshes, and validates reference stores.
pub struct StoreManager {
    transport: Arc<dyn Transport>,
    network_timeout: Duration,
    fetch_retries: u32,
    retry_backoff: Duration,
}

impl std::fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreManager")
            .field("network_timeout", &self.network_timeout)
            .field("fetch_retries", &self.fetch_retries)
            .finish()
    }
}

impl StoreManager {
    pub fn new(transport: Arc<dyn Transport>, settings: &Settings) -> Self {
        Self {
            transport,
            network_timeout: settings.network_timeout,
            fetch_retries: settings.fetch_retries,
            retry_backoff: settings.retry_backoff,
        }
    }

    /// Make sure a valid, as-fresh-as-possible store exists at `paths`.
    ///
    /// The whole call, retries included, is bounded by the network timeout.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Unreachable`] if the remote fails and there is no
    ///   valid store to fall back on
    /// - [`StoreError::IdentityMismatch`] if the store mirrors another
    ///   repository
    /// - [`StoreError::Cancelled`] if `cancel` fires
    #[instrument(skip_all, fields(identity = %identity, store = %paths.store_dir().display()))]
    pub async fn ensure(
        &self,
        identity: &RepositoryIdentity,
        remote_url: &str,
        paths: &StorePaths,
        cancel: &CancellationToken,
    ) -> Result<StoreHandle, StoreError> {
        let deadline = Instant::now() + self.network_timeout;

        match inspect(identity, remote_url, paths)? {
            Existing::Valid(state) => {
                self.update(identity, remote_url, paths, state, deadline, cancel)
                    .await
            }
            Existing::Invalid(why) => {
                warn!(reason = %why, "replacing unusable reference store");
                self.create(identity, remote_url, paths, deadline, cancel)
                    .await
            }
            Existing::Absent => {
                self.create(identity, remote_url, paths, deadline, cancel)
                    .await
            }
        }
    }

    async fn create(
        &self,
        identity: &RepositoryIdentity,
        remote_url: &str,
        paths: &StorePaths,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<StoreHandle, StoreError> {
        info!(url = %remote_url, "creating reference store");

        let parent = paths.parent_dir();
        fs::create_dir_all(&parent).map_err(|source| StoreError::Io {
            action: "cannot create",
            path: parent.clone(),
            source,
        })?;

        let staging = paths.staging_dir(&uuid::Uuid::new_v4().simple().to_string());
        let transfer = Transfer::Clone {
            url: remote_url,
            dest: &staging,
        };

        let result = self.transfer_with_retries(transfer, deadline, cancel).await;
        if let Err(e) = result {
            remove_dir_if_present(&staging);
            return Err(match e {
                TransportError::Cancelled { .. } => StoreError::Cancelled,
                source => StoreError::Unreachable {
                    url: remote_url.to_string(),
                    path: paths.store_dir().to_path_buf(),
                    source,
                },
            });
        }

        let state = SyncState::new(identity.clone(), remote_url);
        if let Err(e) = finish_staging(&staging, &state) {
            remove_dir_if_present(&staging);
            return Err(e);
        }

        // Only an invalid leftover can be here; valid stores are updated
        let store_dir = paths.store_dir();
        if store_dir.exists() {
            fs::remove_dir_all(store_dir).map_err(|source| StoreError::Io {
                action: "cannot remove",
                path: store_dir.to_path_buf(),
                source,
            })?;
        }
        fs::rename(&staging, store_dir).map_err(|source| StoreError::Io {
            action: "cannot move staging store to",
            path: store_dir.to_path_buf(),
            source,
        })?;

        info!("reference store created");
        Ok(StoreHandle {
            paths: paths.clone(),
            identity: identity.clone(),
            remote_url: remote_url.to_string(),
            last_synchronized: Some(state.synchronized_at),
            freshness: Freshness::Fresh,
            created: true,
        })
    }

    async fn update(
        &self,
        identity: &RepositoryIdentity,
        remote_url: &str,
        paths: &StorePaths,
        state: Option<SyncState>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<StoreHandle, StoreError> {
        let store_dir = paths.store_dir();
        let transfer = Transfer::Fetch {
            store: store_dir,
            url: remote_url,
        };

        let handle = |freshness, last_synchronized| StoreHandle {
            paths: paths.clone(),
            identity: identity.clone(),
            remote_url: remote_url.to_string(),
            last_synchronized,
            freshness,
            created: false,
        };

        match self.transfer_with_retries(transfer, deadline, cancel).await {
            Ok(()) => {}
            Err(TransportError::Cancelled { .. }) => return Err(StoreError::Cancelled),
            Err(e) => {
                warn!(error = %e, "cannot refresh reference store, continuing with existing contents");
                let last = state.map(|s| s.synchronized_at);
                return Ok(handle(
                    Freshness::Stale {
                        reason: e.to_string(),
                    },
                    last,
                ));
            }
        }

        self.follow_default_branch(store_dir, remote_url, deadline, cancel)
            .await;

        let mut state = match state {
            Some(state) => state,
            None => {
                info!("adopting existing reference store");
                let git = Git::open_bare(store_dir)?;
                git.config_set("gc.auto", "0")?;
                SyncState::new(identity.clone(), remote_url)
            }
        };
        state.record_fetch(remote_url);
        state.write(store_dir)?;

        info!(fetches = state.fetch_count, "reference store updated");
        Ok(handle(Freshness::Fresh, Some(state.synchronized_at)))
    }

    /// Point the store's HEAD at the remote's current default branch.
    ///
    /// Failure leaves HEAD as it was; resolution still works off the
    /// previous default.
    async fn follow_default_branch(
        &self,
        store_dir: &Path,
        remote_url: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        let ctx = RunContext::new(cancel.clone(), remaining);

        let target = match self.transport.remote_default_branch(remote_url, &ctx).await {
            Ok(Some(target)) => target,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "cannot read remote default branch");
                return;
            }
        };

        let result = Git::open_bare(store_dir).and_then(|git| {
            if git.head_symbolic_target()?.as_ref() != Some(&target) {
                info!(branch = %target.shorthand(), "remote default branch changed");
                git.set_head_symbolic(&target)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!(error = %e, "cannot update store HEAD");
        }
    }

    /// Run a transfer, retrying transient failures with linear backoff
    /// until the deadline.
    async fn transfer_with_retries(
        &self,
        transfer: Transfer<'_>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::TimedOut {
                    command: transfer.name().to_string(),
                    after: self.network_timeout,
                });
            }

            let ctx = RunContext::new(cancel.clone(), remaining);
            let error = match self.transfer(transfer, &ctx).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !error.is_transient() || attempt > self.fetch_retries {
                return Err(error);
            }

            let backoff = self.retry_backoff * attempt;
            if deadline.saturating_duration_since(Instant::now()) <= backoff {
                return Err(error);
            }
            warn!(attempt, error = %error, ?backoff, "transient transport failure, retrying");

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(TransportError::Cancelled {
                        command: transfer.name().to_string(),
                    });
                }
                () = tokio::time::sleep(backoff) => {}
            }
        }
    }

    async fn transfer(&self, transfer: Transfer<'_>, ctx: &RunContext) -> Result<(), TransportError> {
        match transfer {
            Transfer::Clone { url, dest } => {
                // A failed attempt may leave a partial clone behind
                remove_dir_if_present(dest);
                self.transport.mirror_clone(url, dest, ctx).await
            }
            Transfer::Fetch { store, url } => self.transport.fetch_all(store, url, ctx).await,
        }
    }
}

/// Classify what is at the store path.
fn inspect(
    identity: &RepositoryIdentity,
    remote_url: &str,
    paths: &StorePaths,
) -> Result<Existing, StoreError> {
    let store_dir = paths.store_dir();
    if !store_dir.exists() {
        return Ok(Existing::Absent);
    }

    let git = match Git::open_bare(store_dir) {
        Ok(git) => git,
        Err(e) => return Ok(Existing::Invalid(e.to_string())),
    };

    let state = match SyncState::read(store_dir) {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable sync state");
            None
        }
    };

    if let Some(state) = state {
        if &state.identity != identity {
            return Err(StoreError::IdentityMismatch {
                path: store_dir.to_path_buf(),
                expected: identity.to_string(),
                found: state.identity.to_string(),
            });
        }
        return Ok(Existing::Valid(Some(state)));
    }

    // No sync state: either an interrupted clone from an older layout, or
    // a mirror created by another tool that we can adopt.
    if git.list_refs_by_prefix("refs/")?.is_empty() {
        return Ok(Existing::Invalid("store has no refs".to_string()));
    }
    match git.remote_url("origin")? {
        Some(origin) if origin == remote_url => Ok(Existing::Valid(None)),
        Some(origin) => Err(StoreError::IdentityMismatch {
            path: store_dir.to_path_buf(),
            expected: remote_url.to_string(),
            found: origin,
        }),
        None => Ok(Existing::Invalid(
            "store has no sync state and no origin remote".to_string(),
        )),
    }
}

fn finish_staging(staging: &Path, state: &SyncState) -> Result<(), StoreError> {
    let git = Git::open_bare(staging)?;
    git.config_set("gc.auto", "0")?;
    state.write(staging)?;
    Ok(())
}

fn remove_dir_if_present(dir: &Path) {
    if dir.exists() {
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "cannot remove staging directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::core::types::{Oid, RefName};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Transport that fails with scripted errors and records calls.
    #[derive(Default)]
    struct ScriptedTransport {
        failures: Mutex<Vec<TransportError>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn failing(failures: Vec<TransportError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, call: &str) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(call.to_string());
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn mirror_clone(
            &self,
            _url: &str,
            _dest: &Path,
            _ctx: &RunContext,
        ) -> Result<(), TransportError> {
            self.next("clone")
        }

        async fn fetch_all(
            &self,
            _store: &Path,
            _url: &str,
            _ctx: &RunContext,
        ) -> Result<(), TransportError> {
            self.next("fetch")
        }

        async fn remote_default_branch(
            &self,
            _url: &str,
            _ctx: &RunContext,
        ) -> Result<Option<RefName>, TransportError> {
            Ok(None)
        }

        async fn fetch_commit(
            &self,
            _workspace: &Path,
            _source: &Path,
            _oid: &Oid,
            _ctx: &RunContext,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn unreachable() -> TransportError {
        TransportError::Failed {
            command: "git fetch".into(),
            status: "exit status: 128".into(),
            stderr: "fatal: unable to access: Could not resolve host: example.com".into(),
        }
    }

    fn not_found() -> TransportError {
        TransportError::Failed {
            command: "git clone".into(),
            status: "exit status: 128".into(),
            stderr: "fatal: repository not found".into(),
        }
    }

    fn manager(transport: Arc<ScriptedTransport>) -> StoreManager {
        let settings = Settings {
            fetch_retries: 2,
            retry_backoff: Duration::from_millis(1),
            ..Settings::default()
        };
        StoreManager::new(transport, &settings)
    }

    fn identity() -> RepositoryIdentity {
        RepositoryIdentity::new("acme/widget").unwrap()
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .status()
            .expect("failed to run git");
        assert!(status.success(), "git {:?} failed", args);
    }

    /// A bare mirror with one commit and a sync state, as `create` would
    /// leave it.
    fn seed_store(paths: &StorePaths, identity: &RepositoryIdentity) {
        let source = TempDir::new().unwrap();
        run_git(source.path(), &["init", "-q", "-b", "main"]);
        run_git(source.path(), &["commit", "-q", "--allow-empty", "-m", "init"]);

        let store = paths.store_dir().to_string_lossy().into_owned();
        run_git(source.path(), &["clone", "-q", "--mirror", ".", &store]);
        SyncState::new(identity.clone(), "https://example.com/acme/widget.git")
            .write(paths.store_dir())
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_without_store_is_fatal() {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path().join("widget.git"));
        let transport = Arc::new(ScriptedTransport::failing(vec![not_found()]));

        let err = manager(transport.clone())
            .ensure(&identity(), "https://example.com/x.git", &paths, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unreachable { .. }));
        // Not transient, so no retry
        assert_eq!(transport.calls(), vec!["clone"]);
        assert!(!paths.store_dir().exists());
        // Staging directories are cleaned up
        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn unreachable_with_store_is_stale() {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path().join("widget.git"));
        seed_store(&paths, &identity());
        let transport = Arc::new(ScriptedTransport::failing(vec![
            unreachable(),
            unreachable(),
            unreachable(),
        ]));

        let handle = manager(transport.clone())
            .ensure(
                &identity(),
                "https://example.com/acme/widget.git",
                &paths,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(handle.is_stale());
        assert!(!handle.created);
        assert!(handle.last_synchronized.is_some());
        // One attempt plus two retries
        assert_eq!(transport.calls(), vec!["fetch", "fetch", "fetch"]);
    }

    #[tokio::test]
    async fn transient_failure_then_success_is_fresh() {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path().join("widget.git"));
        seed_store(&paths, &identity());
        let transport = Arc::new(ScriptedTransport::failing(vec![unreachable()]));

        let handle = manager(transport.clone())
            .ensure(
                &identity(),
                "https://example.com/acme/widget.git",
                &paths,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(handle.freshness, Freshness::Fresh);
        let state = SyncState::read(paths.store_dir()).unwrap().unwrap();
        assert_eq!(state.fetch_count, 1);
    }

    #[tokio::test]
    async fn identity_mismatch_is_rejected() {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path().join("widget.git"));
        seed_store(&paths, &RepositoryIdentity::new("acme/other").unwrap());
        let transport = Arc::new(ScriptedTransport::default());

        let err = manager(transport.clone())
            .ensure(&identity(), "https://example.com/x.git", &paths, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            StoreError::IdentityMismatch { expected, found, .. } => {
                assert_eq!(expected, "acme/widget");
                assert_eq!(found, "acme/other");
            }
            other => panic!("expected identity mismatch, got {other:?}"),
        }
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_fetch_is_reported() {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path().join("widget.git"));
        seed_store(&paths, &identity());
        let transport = Arc::new(ScriptedTransport::failing(vec![TransportError::Cancelled {
            command: "git fetch".into(),
        }]));

        let err = manager(transport)
            .ensure(
                &identity(),
                "https://example.com/acme/widget.git",
                &paths,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[tokio::test]
    async fn garbage_at_store_path_is_replaced_only_on_success() {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path().join("widget.git"));
        fs::create_dir_all(paths.store_dir()).unwrap();
        fs::write(paths.store_dir().join("junk"), "x").unwrap();
        let transport = Arc::new(ScriptedTransport::failing(vec![not_found()]));

        let err = manager(transport)
            .ensure(&identity(), "https://example.com/x.git", &paths, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unreachable { .. }));
        assert!(paths.store_dir().join("junk").exists());
    }
}
