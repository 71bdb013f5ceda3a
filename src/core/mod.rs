//! core
//!
//! Core domain types, configuration, paths, and locking.
//!
//! # Modules
//!
//! - [`types`] - Strong types: RepositoryIdentity, RevisionSpec, Oid, RefName
//! - [`config`] - Configuration schema, loading, and request resolution
//! - [`paths`] - Path layout of reference stores and workspaces
//! - [`lock`] - Cross-process store locking
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - Nothing here touches the network

pub mod config;
pub mod lock;
pub mod paths;
pub mod types;
