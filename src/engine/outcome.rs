//! engine::outcome
//!
//! The single result of a checkout run and its error taxonomy.

use std::fmt;

use thiserror::Error;

use crate::core::lock::LockError;
use crate::core::types::UtcTimestamp;
use crate::git::GitError;
use crate::resolve::{ResolveError, ResolvedCommit};
use crate::store::{StateError, StoreError};
use crate::workspace::{MaterializeResult, WorkspaceError};

/// Stable names for failure categories, printed in the outcome line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No usable store and the remote is unreachable
    StoreUnreachable,
    /// The store could not be refreshed and policy forbids stale checkouts
    StaleReference,
    RevisionNotFound,
    AmbiguousRevision,
    WorkspaceIdentityMismatch,
    LockTimeout,
    FilesystemError,
    /// The store path holds a mirror of another repository
    StoreIdentityMismatch,
    Cancelled,
    /// Any other repository-level failure
    Git,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StoreUnreachable => "StoreUnreachable",
            ErrorKind::StaleReference => "StaleReference",
            ErrorKind::RevisionNotFound => "RevisionNotFound",
            ErrorKind::AmbiguousRevision => "AmbiguousRevision",
            ErrorKind::WorkspaceIdentityMismatch => "WorkspaceIdentityMismatch",
            ErrorKind::LockTimeout => "LockTimeout",
            ErrorKind::FilesystemError => "FilesystemError",
            ErrorKind::StoreIdentityMismatch => "StoreIdentityMismatch",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Git => "Git",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure of a checkout run.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("store lock: {0}")]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// The checkout completed from a stale store, which policy rejects.
    #[error("reference store could not be refreshed: {reason}")]
    Stale { reason: String },

    #[error("checkout cancelled")]
    Cancelled,
}

impl CheckoutError {
    /// The failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::Lock(e) => match e {
                LockError::Timeout { .. } => ErrorKind::LockTimeout,
                LockError::Cancelled { .. } => ErrorKind::Cancelled,
                // Only the non-waiting acquire reports contention
                LockError::AlreadyLocked { .. } => ErrorKind::LockTimeout,
                LockError::CreateFailed(_)
                | LockError::AcquireFailed(_)
                | LockError::ReleaseFailed(_) => ErrorKind::FilesystemError,
            },
            CheckoutError::Store(e) => match e {
                StoreError::Unreachable { .. } => ErrorKind::StoreUnreachable,
                StoreError::IdentityMismatch { .. } => ErrorKind::StoreIdentityMismatch,
                StoreError::Cancelled => ErrorKind::Cancelled,
                StoreError::Git(e) => git_kind(e),
                StoreError::State(StateError::Io { .. } | StateError::Json { .. })
                | StoreError::Io { .. } => ErrorKind::FilesystemError,
            },
            CheckoutError::Resolve(e) => match e {
                ResolveError::NotFound { .. } => ErrorKind::RevisionNotFound,
                ResolveError::Ambiguous { .. } => ErrorKind::AmbiguousRevision,
                ResolveError::Git(e) => git_kind(e),
            },
            CheckoutError::Workspace(e) => match e {
                WorkspaceError::IdentityMismatch { .. } => ErrorKind::WorkspaceIdentityMismatch,
                WorkspaceError::Cancelled => ErrorKind::Cancelled,
                WorkspaceError::Io { .. } => ErrorKind::FilesystemError,
                WorkspaceError::Git(e) => git_kind(e),
                WorkspaceError::Fetch { .. }
                | WorkspaceError::MissingCommit { .. }
                | WorkspaceError::HeadUnavailable { .. }
                | WorkspaceError::Task(_) => ErrorKind::Git,
            },
            CheckoutError::Stale { .. } => ErrorKind::StaleReference,
            CheckoutError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

fn git_kind(error: &GitError) -> ErrorKind {
    match error {
        GitError::Io { .. } | GitError::AccessError { .. } => ErrorKind::FilesystemError,
        _ => ErrorKind::Git,
    }
}

/// A non-fatal degradation of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The store could not be refreshed; its older contents were used.
    StaleReference {
        reason: String,
        last_synchronized: Option<UtcTimestamp>,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::StaleReference {
                reason,
                last_synchronized: Some(at),
            } => write!(f, "reference store is stale (last synchronized {at}): {reason}"),
            Warning::StaleReference {
                reason,
                last_synchronized: None,
            } => write!(f, "reference store is stale: {reason}"),
        }
    }
}

/// Everything a completed checkout did.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub resolved: ResolvedCommit,
    pub workspace: MaterializeResult,
    /// True when the store was created by this run
    pub store_created: bool,
}

/// The single result of [`super::Orchestrator::run`].
#[derive(Debug)]
pub enum Outcome {
    Success(Checkout),
    Warning {
        checkout: Checkout,
        warnings: Vec<Warning>,
    },
    Failure {
        error: CheckoutError,
    },
}

impl Outcome {
    /// Process exit code: success and warning exit 0, failure exits 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Success(_) | Outcome::Warning { .. } => 0,
            Outcome::Failure { .. } => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The checkout, unless the run failed.
    pub fn checkout(&self) -> Option<&Checkout> {
        match self {
            Outcome::Success(checkout) | Outcome::Warning { checkout, .. } => Some(checkout),
            Outcome::Failure { .. } => None,
        }
    }

    /// The error kind, if the run failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Failure { error } => Some(error.kind()),
            _ => None,
        }
    }
}
