//! Shared fixtures for integration tests.
//!
//! Upstream repositories are ordinary non-bare repositories created with the
//! `git` binary, addressed by absolute path so no network is involved.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use refcheckout::core::config::{CheckoutRequest, Settings};
use refcheckout::core::paths::StorePaths;
use refcheckout::core::types::{RepositoryIdentity, RevisionSpec};
use refcheckout::engine::{Checkout, Orchestrator, Outcome};

/// Run a git command in `dir`, panicking on failure. Returns trimmed stdout.
pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// Whether a git command succeeds in `dir`.
pub fn git_succeeds(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Test fixture for the remote repository.
pub struct Upstream {
    dir: TempDir,
}

impl Upstream {
    /// A repository with one commit on `main` containing `README.md`.
    pub fn new() -> Self {
        Self::with_readme("# widget\n")
    }

    pub fn with_readme(readme: &str) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");

        run_git(dir.path(), &["init", "-b", "main"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);
        run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
        run_git(dir.path(), &["config", "tag.gpgsign", "false"]);

        let upstream = Self { dir };
        upstream.commit_file("README.md", readme, "Initial commit");
        upstream
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The remote URL, a plain absolute path.
    pub fn url(&self) -> String {
        self.path().to_string_lossy().into_owned()
    }

    /// Write a file and commit it, returning the new commit id.
    pub fn commit_file(&self, path: &str, content: &str, message: &str) -> String {
        let full = self.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
        run_git(self.path(), &["add", path]);
        run_git(self.path(), &["commit", "-m", message]);
        self.head()
    }

    /// Remove a file and commit the removal.
    pub fn remove_file(&self, path: &str, message: &str) -> String {
        run_git(self.path(), &["rm", "-q", path]);
        run_git(self.path(), &["commit", "-m", message]);
        self.head()
    }

    pub fn head(&self) -> String {
        self.rev_parse("HEAD")
    }

    pub fn rev_parse(&self, spec: &str) -> String {
        run_git(self.path(), &["rev-parse", &format!("{spec}^{{commit}}")])
    }

    pub fn branch(&self, name: &str) {
        run_git(self.path(), &["branch", name]);
    }

    /// Switch branches (which also moves the remote's default branch).
    pub fn checkout(&self, name: &str) {
        run_git(self.path(), &["checkout", "-q", name]);
    }

    pub fn checkout_new(&self, name: &str) {
        run_git(self.path(), &["checkout", "-q", "-b", name]);
    }

    pub fn tag(&self, name: &str) {
        run_git(self.path(), &["tag", name]);
    }

    pub fn annotated_tag(&self, name: &str, message: &str) {
        run_git(self.path(), &["tag", "-a", name, "-m", message]);
    }
}

/// Host directories for stores and workspaces.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn cache(&self) -> PathBuf {
        self.path().join("cache")
    }

    pub fn workspace(&self, name: &str) -> PathBuf {
        self.path().join("builds").join(name)
    }

    /// A request for `identity` backed by `upstream`, with test-sized timeouts.
    pub fn request_for(
        &self,
        identity: &str,
        upstream: &Upstream,
        job: &str,
        revision: &str,
    ) -> CheckoutRequest {
        let identity = RepositoryIdentity::new(identity).unwrap();
        CheckoutRequest {
            store: StorePaths::new(self.cache().join(identity.default_store_name())),
            remote_url: upstream.url(),
            identity,
            target_dir: self.workspace(job),
            revision: RevisionSpec::parse(revision),
            clean: false,
            settings: settings(),
        }
    }

    pub fn request(&self, upstream: &Upstream, job: &str, revision: &str) -> CheckoutRequest {
        self.request_for("acme/widget", upstream, job, revision)
    }
}

pub fn settings() -> Settings {
    Settings {
        network_timeout: Duration::from_secs(60),
        lock_timeout: Duration::from_secs(30),
        fetch_retries: 0,
        retry_backoff: Duration::from_millis(10),
        ..Settings::default()
    }
}

/// An executable that stands in for `git` and never finishes, for
/// exercising timeouts and cancellation of in-flight transfers.
pub fn hanging_git(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("hanging-git");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Run a checkout with a fresh cancellation token.
pub async fn run(request: &CheckoutRequest) -> Outcome {
    Orchestrator::for_request(request, CancellationToken::new())
        .run(request)
        .await
}

/// The checkout of a successful outcome.
pub fn success(outcome: &Outcome) -> &Checkout {
    match outcome {
        Outcome::Success(checkout) => checkout,
        other => panic!("expected success, got {other:?}"),
    }
}

/// HEAD of a workspace, via the git binary.
pub fn workspace_head(path: &Path) -> String {
    run_git(path, &["rev-parse", "HEAD"])
}

/// `git status --porcelain --ignored` output of a workspace.
pub fn workspace_status(path: &Path) -> String {
    run_git(path, &["status", "--porcelain", "--ignored"])
}
