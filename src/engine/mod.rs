//! engine
//!
//! Orchestrates a checkout run: Lock -> Ensure store -> Resolve -> Clean ->
//! Materialize.
//!
//! # Architecture
//!
//! The orchestrator is the only component that sees a whole
//! [`CheckoutRequest`]. It sequences the components, holds the store lock
//! in the right mode for each phase, and folds every result into exactly
//! one [`Outcome`]:
//!
//! ```text
//! exclusive lock ─ ensure store ─ release
//! shared lock ─ resolve ─ materialize [clean] ─ release
//! ```
//!
//! The exclusive phase is short (one fetch) and the shared phase lets jobs
//! for different workspaces of the same store proceed together.
//!
//! # Invariants
//!
//! - Locks are RAII guards, released on every exit path
//! - The cleaner never runs without `clean`, and never on a workspace that
//!   belongs to another repository (that one is recreated instead)
//! - Neither cleaning nor recreating the workspace removes the store or its
//!   lock file
//! - Cancellation yields `Failure(Cancelled)`; the next run repairs any
//!   half-updated workspace
//!
//! # Example
//!
//! ```ignore
//! use refcheckout::engine::Orchestrator;
//!
//! let orchestrator = Orchestrator::new(transport, cancel);
//! let outcome = orchestrator.run(&request).await;
//! std::process::exit(outcome.exit_code().into());
//! ```

mod outcome;

pub use outcome::{Checkout, CheckoutError, ErrorKind, Outcome, Warning};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::core::config::{CheckoutRequest, StalePolicy};
use crate::core::lock::{LockMode, StoreLock};
use crate::git::{GitCli, Transport};
use crate::resolve;
use crate::store::{Freshness, StoreManager};
use crate::workspace::{Materializer, Workspace};

/// Sequences one checkout run.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, cancel: CancellationToken) -> Self {
        Self { transport, cancel }
    }

    /// An orchestrator using the `git` executable named in the request.
    pub fn for_request(request: &CheckoutRequest, cancel: CancellationToken) -> Self {
        Self::new(
            Arc::new(GitCli::new(&request.settings.git_binary)),
            cancel,
        )
    }

    /// Run the checkout. Never fails; failures are an [`Outcome`].
    #[instrument(skip_all, fields(identity = %request.identity))]
    pub async fn run(&self, request: &CheckoutRequest) -> Outcome {
        match self.checkout(request).await {
            Ok((checkout, warnings)) if warnings.is_empty() => Outcome::Success(checkout),
            Ok((checkout, warnings)) => Outcome::Warning { checkout, warnings },
            Err(error) => Outcome::Failure { error },
        }
    }

    async fn checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<(Checkout, Vec<Warning>), CheckoutError> {
        if self.cancel.is_cancelled() {
            return Err(CheckoutError::Cancelled);
        }
        let settings = &request.settings;
        info!(
            revision = %request.revision,
            store = %request.store.store_dir().display(),
            target = %request.target_dir.display(),
            clean = request.clean,
            "starting checkout"
        );

        let store = {
            let _exclusive = StoreLock::acquire_within(
                &request.store,
                LockMode::Exclusive,
                settings.lock_timeout,
                &self.cancel,
            )
            .await?;
            StoreManager::new(self.transport.clone(), settings)
                .ensure(
                    &request.identity,
                    &request.remote_url,
                    &request.store,
                    &self.cancel,
                )
                .await?
        };

        let _shared = StoreLock::acquire_within(
            &request.store,
            LockMode::Shared,
            settings.lock_timeout,
            &self.cancel,
        )
        .await?;

        let resolved = resolve::resolve(&store, &request.revision)?;
        info!(commit = %resolved.oid, source = %resolved.source, "revision resolved");

        let target = Workspace::new(
            &request.target_dir,
            request.identity.clone(),
            request.remote_url.clone(),
        )
        .keeping(request.store.store_dir())
        .keeping(request.store.lock_path());

        let result = Materializer::new(self.transport.clone(), settings.network_timeout)
            .materialize(&target, &resolved, &store, request.clean, &self.cancel)
            .await?;

        let mut warnings = Vec::new();
        if let Freshness::Stale { reason } = &store.freshness {
            match settings.stale_policy {
                StalePolicy::Warn => warnings.push(Warning::StaleReference {
                    reason: reason.clone(),
                    last_synchronized: store.last_synchronized.clone(),
                }),
                StalePolicy::Fail => {
                    return Err(CheckoutError::Stale {
                        reason: reason.clone(),
                    })
                }
            }
        }

        Ok((
            Checkout {
                resolved,
                workspace: result,
                store_created: store.created,
            },
            warnings,
        ))
    }
}
