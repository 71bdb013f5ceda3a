//! Logging initialization.
//!
//! Events go to stderr through `tracing-subscriber`. The level comes from
//! the verbosity flags unless `RUST_LOG` is set, in which case `RUST_LOG`
//! wins.

use tracing_subscriber::EnvFilter;

use crate::ui::output::Verbosity;

/// Default filter directive for a verbosity level.
pub fn default_directive(verbosity: Verbosity) -> &'static str {
    match verbosity {
        Verbosity::Quiet => "refcheckout=warn",
        Verbosity::Normal => "refcheckout=info",
        Verbosity::Debug => "refcheckout=debug",
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity == Verbosity::Debug)
        .try_init();
}
