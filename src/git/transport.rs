//! git::transport
//!
//! Network transfer through the `git` executable.
//!
//! libgit2 is built without network backends, so every operation that
//! talks to a remote (or copies objects between repositories) runs the
//! installed `git` as a child process. Credentials, proxies, and protocol
//! selection are whatever that `git` is configured with.
//!
//! Every call is bounded by a [`RunContext`]: the child is killed when the
//! timeout elapses or the cancellation token fires.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::types::{Oid, RefName};

/// stderr fragments that indicate a failure worth retrying.
const TRANSIENT_HINTS: &[&str] = &[
    "could not resolve host",
    "temporary failure in name resolution",
    "connection reset",
    "connection refused",
    "connection timed out",
    "operation timed out",
    "early eof",
    "the remote end hung up unexpectedly",
    "rpc failed",
    "unexpected disconnect",
    "http 502",
    "http 503",
    "http 504",
    "error: 502",
    "error: 503",
    "error: 504",
];

/// Errors from running `git`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The executable could not be started.
    #[error("cannot run {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },

    /// `git` exited unsuccessfully.
    #[error("{command} failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The call exceeded its time budget and was killed.
    #[error("{command} timed out after {after:?}")]
    TimedOut { command: String, after: Duration },

    /// The call was cancelled and killed.
    #[error("{command} was cancelled")]
    Cancelled { command: String },

    /// Output could not be interpreted.
    #[error("unexpected output from {command}: {message}")]
    Protocol { command: String, message: String },
}

impl TransportError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::TimedOut { .. } => true,
            TransportError::Failed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                TRANSIENT_HINTS.iter().any(|hint| stderr.contains(hint))
            }
            TransportError::Spawn { .. }
            | TransportError::Cancelled { .. }
            | TransportError::Protocol { .. } => false,
        }
    }
}

/// Time budget and cancellation for one transport call.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }
}

/// Operations that move objects between repositories.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a bare mirror of `url` at `dest`, which must not exist.
    async fn mirror_clone(&self, url: &str, dest: &Path, ctx: &RunContext)
        -> Result<(), TransportError>;

    /// Fetch every ref of `url` into the bare repository at `store`,
    /// pruning refs the remote no longer has.
    async fn fetch_all(&self, store: &Path, url: &str, ctx: &RunContext)
        -> Result<(), TransportError>;

    /// The branch the remote's `HEAD` points at, if it advertises one.
    async fn remote_default_branch(
        &self,
        url: &str,
        ctx: &RunContext,
    ) -> Result<Option<RefName>, TransportError>;

    /// Copy `oid` and its history from the repository at `source` into the
    /// workspace at `workspace`.
    async fn fetch_commit(
        &self,
        workspace: &Path,
        source: &Path,
        oid: &Oid,
        ctx: &RunContext,
    ) -> Result<(), TransportError>;
}

/// [`Transport`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: Vec<OsString>, ctx: &RunContext) -> Result<String, TransportError> {
        let command = describe(&args);

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = ?cmd, timeout = ?ctx.timeout, "running git");

        let child = cmd.spawn().map_err(|source| TransportError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                return Err(TransportError::Cancelled { command });
            }
            waited = tokio::time::timeout(ctx.timeout, child.wait_with_output()) => match waited {
                Err(_) => {
                    return Err(TransportError::TimedOut { command, after: ctx.timeout });
                }
                Ok(result) => result.map_err(|source| TransportError::Spawn {
                    binary: self.binary.clone(),
                    source,
                })?,
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TransportError::Failed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Transport for GitCli {
    async fn mirror_clone(
        &self,
        url: &str,
        dest: &Path,
        ctx: &RunContext,
    ) -> Result<(), TransportError> {
        let args = vec![
            "-c".into(),
            "gc.auto=0".into(),
            "clone".into(),
            "--mirror".into(),
            "--quiet".into(),
            url.into(),
            dest.into(),
        ];
        self.run(args, ctx).await.map(|_| ())
    }

    async fn fetch_all(
        &self,
        store: &Path,
        url: &str,
        ctx: &RunContext,
    ) -> Result<(), TransportError> {
        let args = vec![
            "-C".into(),
            store.into(),
            "-c".into(),
            "gc.auto=0".into(),
            "fetch".into(),
            "--prune".into(),
            "--quiet".into(),
            url.into(),
            "+refs/*:refs/*".into(),
        ];
        self.run(args, ctx).await.map(|_| ())
    }

    async fn remote_default_branch(
        &self,
        url: &str,
        ctx: &RunContext,
    ) -> Result<Option<RefName>, TransportError> {
        let args = vec!["ls-remote".into(), "--symref".into(), url.into(), "HEAD".into()];
        let stdout = self.run(args, ctx).await?;
        parse_symref_head(&stdout).map_err(|message| TransportError::Protocol {
            command: "git ls-remote".to_string(),
            message,
        })
    }

    async fn fetch_commit(
        &self,
        workspace: &Path,
        source: &Path,
        oid: &Oid,
        ctx: &RunContext,
    ) -> Result<(), TransportError> {
        let args = vec![
            "-C".into(),
            workspace.into(),
            "fetch".into(),
            "--quiet".into(),
            "--no-tags".into(),
            source.into(),
            oid.as_str().into(),
        ];
        self.run(args, ctx).await.map(|_| ())
    }
}

/// `git <subcommand>` for messages, skipping `-C <dir>` and `-c <kv>`.
fn describe(args: &[OsString]) -> String {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "-C" || arg == "-c" {
            iter.next();
            continue;
        }
        return format!("git {}", arg.to_string_lossy());
    }
    "git".to_string()
}

/// Parse `ls-remote --symref <url> HEAD` output.
fn parse_symref_head(stdout: &str) -> Result<Option<RefName>, String> {
    for line in stdout.lines() {
        let Some(rest) = line.strip_prefix("ref: ") else {
            continue;
        };
        let Some((target, name)) = rest.split_once('\t') else {
            return Err(format!("malformed symref line '{line}'"));
        };
        if name.trim() == "HEAD" {
            return RefName::new(target.trim())
                .map(Some)
                .map_err(|e| e.to_string());
        }
    }
    Ok(None)
}
