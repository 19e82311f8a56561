// src/lib.rs

//! Pallet Package Manager
//!
//! Dependency resolution and installation core for artifact-based
//! packages.
//!
//! # Architecture
//!
//! - Database-first: installed state lives in SQLite, keyed by package
//!   fingerprint (`category/name@version`)
//! - Boolean solver: install and uninstall requests become ordered sets
//!   of package assertions (present or absent)
//! - Repositories: HTTP or local directories carrying a JSON index, the
//!   built artifacts, and a definition tree with finalizers
//! - Worker pool: artifact downloads and extraction fan out over a
//!   bounded number of threads with cancel-on-failure

pub mod db;
mod error;
pub mod installer;
pub mod package;
pub mod repository;
pub mod solver;
pub mod tree;

pub use error::{Error, Result};
