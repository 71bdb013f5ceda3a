//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! Two doorways, and no module outside this one touches Git:
//!
//! - [`Git`] wraps `git2` for everything on local disk: opening stores and
//!   workspaces, refs, prefix lookup, alternates, checkout, status.
//! - [`Transport`] moves objects. Its only implementation, [`GitCli`], runs
//!   the `git` executable, since libgit2 is built without network support
//!   and remote access must honour the host's git configuration.
//!
//! # Invariants
//!
//! - No other module calls git2 directly
//! - No other module spawns `git`
//! - All operations return strong types (Oid, RefName)
//!
//! # Example
//!
//! ```ignore
//! use refcheckout::git::{Git, GitCli, RunContext, Transport};
//!
//! let ctx = RunContext::new(cancel.clone(), Duration::from_secs(60));
//! GitCli::default().fetch_all(store_dir, url, &ctx).await?;
//!
//! let store = Git::open_bare(store_dir)?;
//! let oid = store.resolve_ref("refs/heads/main")?;
//! ```

mod interface;
mod transport;

pub use interface::{Git, GitError, PrefixMatch, RefEntry, WorktreeStatus};
pub use transport::{GitCli, RunContext, Transport, TransportError};
