//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! Flags that CI wrappers historically spelled differently keep those
//! spellings as visible aliases. Unset flags fall back to the CI input
//! variables in [`crate::core::config::request::OPTIONS`], which are read
//! during request resolution rather than by clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::core::config::{Invocation, StalePolicy};

/// Check out a repository from a shared reference mirror
#[derive(Parser, Debug)]
#[command(name = "refcheckout")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
EXAMPLES:
    # Default branch of the repository named by $GITHUB_REPOSITORY
    refcheckout

    # A tag into a scratch directory, starting from a clean tree
    refcheckout --repository acme/widget --target-ref v1.2.0 --target-dir build --clean")]
pub struct Cli {
    /// Repository identity, e.g. owner/name
    #[arg(long, visible_alias = "project", value_name = "ID")]
    pub repository: Option<String>,

    /// Reference store directory (bare mirror)
    #[arg(long, visible_alias = "common-path", value_name = "PATH")]
    pub ref_dir: Option<PathBuf>,

    /// Directory to check the repository out into
    #[arg(long, visible_alias = "path", value_name = "PATH")]
    pub target_dir: Option<PathBuf>,

    /// Branch, tag, ref, or commit id; empty means the default branch
    #[arg(long = "target-ref", visible_alias = "ref", value_name = "SPEC")]
    pub target_ref: Option<String>,

    /// Reset tracked files and remove untracked files before checkout
    #[arg(long)]
    pub clean: bool,

    /// Seconds allowed for each remote operation
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    pub network_timeout: Option<Duration>,

    /// Seconds to wait for the reference store lock
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    pub lock_timeout: Option<Duration>,

    /// What to do when the reference store cannot be refreshed
    #[arg(long, value_name = "warn|fail")]
    pub stale_policy: Option<StalePolicy>,

    /// Configuration file (default: $REFCHECKOUT_CONFIG, then the user config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Only print warnings and the outcome line
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }

    /// The raw values for request resolution.
    pub fn invocation(&self) -> Invocation {
        Invocation {
            repository: self.repository.clone(),
            ref_dir: self.ref_dir.clone(),
            target_dir: self.target_dir.clone(),
            target_ref: self.target_ref.clone(),
            clean: self.clean.then_some(true),
            network_timeout: self.network_timeout,
            lock_timeout: self.lock_timeout,
            stale_policy: self.stale_policy,
        }
    }
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a whole number of seconds"))?;
    if secs == 0 {
        return Err("timeout must be at least 1 second".to_string());
    }
    Ok(Duration::from_secs(secs))
}
