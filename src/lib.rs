//! refcheckout - CI checkout backed by a shared reference mirror
//!
//! Each pipeline job checks out one revision of one repository into its
//! workspace. Instead of cloning from the remote every time, jobs on a host
//! share a bare mirror per repository (the reference store) and workspaces
//! borrow its objects, so a checkout costs one incremental fetch.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface layer (parses args, runs the engine)
//! - [`engine`] - Orchestrates Lock → Ensure store → Resolve → Clean → Materialize
//! - [`store`] - Reference store creation, refresh, and staleness
//! - [`resolve`] - Revision spec to commit resolution
//! - [`workspace`] - Workspace materialization and cleaning
//! - [`core`] - Domain types, configuration, paths, and locking
//! - [`git`] - Repository access (git2) and network transport (git binary)
//! - [`telemetry`] - Logging setup
//! - [`ui`] - Outcome reporting
//!
//! # Correctness Invariants
//!
//! 1. A store path holds either nothing or a complete mirror
//! 2. Store updates are serialized across processes; reads are shared
//! 3. Objects are never removed from a store while workspaces borrow them
//! 4. A workspace is never silently reused for another repository

pub mod cli;
pub mod core;
pub mod engine;
pub mod git;
pub mod resolve;
pub mod store;
pub mod telemetry;
pub mod ui;
pub mod workspace;
