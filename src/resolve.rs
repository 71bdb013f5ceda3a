//! resolve
//!
//! Revision resolution against a reference store.
//!
//! A revision spec is matched in a fixed order and the first hit wins:
//!
//! 1. empty: the store's default branch (`HEAD`)
//! 2. a full ref name (`refs/...`)
//! 3. a branch, `refs/heads/<spec>`
//! 4. a tag, `refs/tags/<spec>`, peeled to its commit
//! 5. an abbreviated or full commit id
//!
//! Resolution only reads the store.

use std::fmt;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::types::{Oid, RefName, RevisionSpec};
use crate::git::{Git, GitError, PrefixMatch};
use crate::store::StoreHandle;

/// Errors from revision resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Nothing in the store matches the requested revision.
    #[error("revision '{spec}' not found{}", if *stale { " (reference store could not be refreshed)" } else { "" })]
    NotFound { spec: String, stale: bool },

    /// A commit id prefix matches several objects.
    #[error("revision '{spec}' is ambiguous; candidates: {}", candidates.iter().map(Oid::as_str).collect::<Vec<_>>().join(", "))]
    Ambiguous { spec: String, candidates: Vec<Oid> },

    #[error(transparent)]
    Git(#[from] GitError),
}

/// How a revision spec was matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionSource {
    /// The store's default branch
    DefaultBranch(Option<RefName>),
    /// A full ref name
    Ref(RefName),
    Branch(RefName),
    Tag(RefName),
    /// A commit id or prefix
    CommitId,
}

impl fmt::Display for RevisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionSource::DefaultBranch(Some(name)) => {
                write!(f, "default branch {}", name.shorthand())
            }
            RevisionSource::DefaultBranch(None) => write!(f, "default branch"),
            RevisionSource::Ref(name) => write!(f, "ref {name}"),
            RevisionSource::Branch(name) => write!(f, "branch {}", name.shorthand()),
            RevisionSource::Tag(name) => write!(f, "tag {}", name.shorthand()),
            RevisionSource::CommitId => write!(f, "commit id"),
        }
    }
}

/// A revision spec resolved to a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommit {
    pub oid: Oid,
    pub spec: RevisionSpec,
    pub source: RevisionSource,
}

/// Resolve `spec` to a commit in the store.
///
/// # Errors
///
/// - [`ResolveError::NotFound`] if nothing matches; `stale` is set when the
///   store could not be refreshed this run
/// - [`ResolveError::Ambiguous`] if a prefix matches several objects
#[instrument(skip_all, fields(spec = %spec, store = %store.path().display()))]
pub fn resolve(store: &StoreHandle, spec: &RevisionSpec) -> Result<ResolvedCommit, ResolveError> {
    let git = store.open()?;
    let resolved = resolve_in(&git, spec, store.is_stale())?;
    debug!(oid = %resolved.oid, source = %resolved.source, "resolved revision");
    Ok(resolved)
}

/// Resolution against an open repository.
pub fn resolve_in(git: &Git, spec: &RevisionSpec, stale: bool) -> Result<ResolvedCommit, ResolveError> {
    let not_found = || ResolveError::NotFound {
        spec: spec.to_string(),
        stale,
    };

    let name = match spec {
        RevisionSpec::Default => {
            let oid = git.try_head_oid()?.ok_or_else(not_found)?;
            return Ok(ResolvedCommit {
                oid,
                spec: spec.clone(),
                source: RevisionSource::DefaultBranch(git.head_symbolic_target()?),
            });
        }
        RevisionSpec::Named(name) => name.as_str(),
    };

    let found = |oid: Oid, source: RevisionSource| ResolvedCommit {
        oid,
        spec: spec.clone(),
        source,
    };

    if name.starts_with("refs/") {
        if let Ok(refname) = RefName::new(name) {
            if let Some(oid) = try_commit_ref(git, &refname)? {
                return Ok(found(oid, RevisionSource::Ref(refname)));
            }
        }
    }

    if let Ok(branch) = RefName::for_branch(name) {
        if let Some(oid) = try_commit_ref(git, &branch)? {
            return Ok(found(oid, RevisionSource::Branch(branch)));
        }
    }

    if let Ok(tag) = RefName::for_tag(name) {
        if let Some(oid) = try_commit_ref(git, &tag)? {
            return Ok(found(oid, RevisionSource::Tag(tag)));
        }
    }

    if spec.is_hex_prefix() {
        match git.find_by_prefix(name)? {
            PrefixMatch::Unique {
                commit: Some(oid), ..
            } => return Ok(found(oid, RevisionSource::CommitId)),
            PrefixMatch::Unique { object, commit: None } => {
                debug!(%object, "prefix names a non-commit object");
            }
            PrefixMatch::Ambiguous(candidates) => {
                return Err(ResolveError::Ambiguous {
                    spec: name.to_string(),
                    candidates,
                });
            }
            PrefixMatch::None => {}
        }
    }

    Err(not_found())
}

/// Resolve a ref to a commit; refs that do not exist or do not peel to a
/// commit (a tag of a tree, say) do not match.
fn try_commit_ref(git: &Git, refname: &RefName) -> Result<Option<Oid>, GitError> {
    match git.try_resolve_ref(refname.as_str()) {
        Ok(oid) => Ok(oid),
        Err(
            GitError::ObjectNotFound { .. }
            | GitError::InvalidOid { .. }
            | GitError::Internal { .. },
        ) if git.ref_exists(refname.as_str()) => Ok(None),
        Err(e) => Err(e),
    }
}
