//! ui::output
//!
//! Output formatting and display.
//!
//! # Design
//!
//! Every invocation ends with exactly one outcome line on stderr. Progress
//! goes through `tracing`; this module only renders the final result.

use std::fmt::Display;

use crate::core::types::RepositoryIdentity;
use crate::engine::{Checkout, Outcome};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - warnings and the outcome line only
    Quiet,
    /// Normal mode - progress at info level
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Render the outcome line for a run.
pub fn outcome_line(identity: &RepositoryIdentity, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success(checkout) => format!("ok: {}", describe(identity, checkout)),
        Outcome::Warning { checkout, warnings } => {
            let reasons = warnings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            format!("warning: {}: {}", describe(identity, checkout), reasons)
        }
        Outcome::Failure { error } => format!("error[{}]: {}", error.kind(), error),
    }
}

/// Print the outcome line (always shown).
pub fn report(identity: &RepositoryIdentity, outcome: &Outcome) {
    eprintln!("{}", outcome_line(identity, outcome));
}

fn describe(identity: &RepositoryIdentity, checkout: &Checkout) -> String {
    format!(
        "{} at {} ({})",
        identity,
        checkout.workspace.commit,
        checkout.workspace.action
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::core::types::{Oid, RefName, RevisionSpec, UtcTimestamp};
    use crate::engine::{CheckoutError, Warning};
    use crate::resolve::{ResolveError, ResolvedCommit, RevisionSource};
    use crate::workspace::{MaterializeAction, MaterializeResult};

    fn checkout() -> Checkout {
        let oid = Oid::new("0123456789abcdef0123456789abcdef01234567").unwrap();
        Checkout {
            resolved: ResolvedCommit {
                oid: oid.clone(),
                spec: RevisionSpec::Default,
                source: RevisionSource::DefaultBranch(Some(RefName::for_branch("main").unwrap())),
            },
            workspace: MaterializeResult {
                path: PathBuf::from("/builds/job"),
                commit: oid,
                previous: None,
                action: MaterializeAction::Created,
                cleaned: None,
            },
            store_created: true,
        }
    }

    fn identity() -> RepositoryIdentity {
        RepositoryIdentity::new("acme/widget").unwrap()
    }

    #[test]
    fn verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }

    #[test]
    fn success_line() {
        let line = outcome_line(&identity(), &Outcome::Success(checkout()));
        assert_eq!(
            line,
            "ok: acme/widget at 0123456789abcdef0123456789abcdef01234567 (created)"
        );
    }

    #[test]
    fn warning_line_carries_reason() {
        let outcome = Outcome::Warning {
            checkout: checkout(),
            warnings: vec![Warning::StaleReference {
                reason: "git fetch timed out after 5s".into(),
                last_synchronized: Some(UtcTimestamp::now()),
            }],
        };
        let line = outcome_line(&identity(), &outcome);
        assert!(line.starts_with("warning: acme/widget at 0123456"));
        assert!(line.contains("git fetch timed out"));
    }

    #[test]
    fn failure_line_names_kind() {
        let outcome = Outcome::Failure {
            error: CheckoutError::Resolve(ResolveError::NotFound {
                spec: "v9".into(),
                stale: false,
            }),
        };
        assert_eq!(
            outcome_line(&identity(), &outcome),
            "error[RevisionNotFound]: revision 'v9' not found"
        );
    }
}
