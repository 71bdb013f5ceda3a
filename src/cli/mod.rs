//! cli
//!
//! Command-line interface layer for refcheckout.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments
//! - Capture the ambient CI context once and resolve a [`CheckoutRequest`]
//! - Run the orchestrator, turning SIGINT/SIGTERM into cancellation
//! - Print the outcome line and choose the exit code
//!
//! # Exit codes
//!
//! - 0: checkout succeeded, possibly with warnings
//! - 1: checkout failed
//! - 2: invalid arguments or configuration

pub mod args;

pub use args::Cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::core::config::{AmbientContext, CheckoutRequest, Config, ConfigError};
use crate::engine::{Orchestrator, Outcome};
use crate::telemetry;
use crate::ui::output::{self, Verbosity};

/// Exit code for invalid arguments or configuration, matching clap's.
pub const USAGE_EXIT: u8 = 2;

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse_args();
    telemetry::init(Verbosity::from_flags(cli.quiet, cli.debug));

    let ambient = AmbientContext::from_env().context("cannot determine the current directory")?;
    let request = match prepare(&cli, &ambient) {
        Ok(request) => request,
        Err(e) => {
            output::error(&e);
            return Ok(ExitCode::from(USAGE_EXIT));
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let outcome = runtime.block_on(execute(&request));

    output::report(&request.identity, &outcome);
    Ok(ExitCode::from(outcome.exit_code()))
}

/// Load configuration and resolve the request.
pub fn prepare(cli: &Cli, ambient: &AmbientContext) -> Result<CheckoutRequest, ConfigError> {
    let config = Config::load(cli.config.as_deref())?;
    CheckoutRequest::resolve(&cli.invocation(), ambient, &config)
}

async fn execute(request: &CheckoutRequest) -> Outcome {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("termination requested, cancelling checkout");
            cancel.cancel();
        })
    };

    let outcome = Orchestrator::for_request(request, cancel).run(request).await;
    watcher.abort();
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
