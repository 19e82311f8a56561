// src/db/mod.rs

//! Database layer for Pallet
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema creation
//! - Connection management
//! - The installed-state contract used by the solver and installer
//!   (packages, file lists, repositories; keyed by fingerprint)

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use crate::package::Package;
use models::{FileRecord, PackageRecord, RepositoryRecord};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Initialize a new Pallet database at the specified path
///
/// Creates the database file and sets up the initial schema.
/// This is idempotent - calling it on an existing database is safe.
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    // Open/create the database
    let conn = Connection::open(db_path)?;

    // Set pragmas for better performance and reliability
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Handle to the installed-state ledger
///
/// All operations are keyed by package fingerprint. The connection sits
/// behind a mutex: install workers record file lists for distinct
/// fingerprints concurrently, and no two workers share a fingerprint.
#[derive(Debug)]
pub struct PackageDb {
    conn: Mutex<Connection>,
}

impl PackageDb {
    /// Open an existing Pallet database
    pub fn open(db_path: &str) -> Result<Self> {
        if !Path::new(db_path).exists() {
            return Err(Error::DatabaseNotFound(db_path.to_string()));
        }

        let conn = Connection::open(db_path)?;

        // Set pragmas
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        schema::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a throwaway in-memory database (tests, closed-world solving)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::InitError("Database lock poisoned".to_string()))?;
        f(&conn)
    }

    /// Find an installed package by fingerprint
    pub fn find_package(&self, fingerprint: &str) -> Result<Option<Package>> {
        self.with_conn(|conn| {
            match PackageRecord::find_by_fingerprint(conn, fingerprint)? {
                Some(record) => Ok(Some(record.to_package()?)),
                None => Ok(None),
            }
        })
    }

    /// All installed packages, in deterministic order
    pub fn installed(&self) -> Result<Vec<Package>> {
        self.with_conn(|conn| {
            PackageRecord::list_all(conn)?
                .iter()
                .map(|r| r.to_package())
                .collect()
        })
    }

    /// Create an installed-package record
    pub fn create_package(&self, package: &Package) -> Result<()> {
        self.with_conn(|conn| {
            let mut record = PackageRecord::from_package(package)?;
            record.insert(conn)?;
            Ok(())
        })
    }

    /// Update an existing installed-package record
    pub fn update_package(&self, package: &Package) -> Result<()> {
        self.with_conn(|conn| PackageRecord::from_package(package)?.update(conn))
    }

    /// Remove an installed-package record
    pub fn remove_package(&self, fingerprint: &str) -> Result<()> {
        self.with_conn(|conn| PackageRecord::delete(conn, fingerprint))
    }

    /// Record the extracted file list for a fingerprint
    pub fn set_package_files(&self, fingerprint: &str, files: &[String]) -> Result<()> {
        self.with_conn(|conn| FileRecord::set(conn, fingerprint, files))
    }

    /// Fetch the recorded file list for a fingerprint
    pub fn get_package_files(&self, fingerprint: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| FileRecord::get(conn, fingerprint))
    }

    /// Remove the recorded file list for a fingerprint
    pub fn remove_package_files(&self, fingerprint: &str) -> Result<()> {
        self.with_conn(|conn| FileRecord::remove(conn, fingerprint))
    }

    /// Insert a repository configuration record
    pub fn insert_repository(&self, record: &mut RepositoryRecord) -> Result<i64> {
        self.with_conn(|conn| record.insert(conn))
    }

    /// Find a repository configuration by name
    pub fn find_repository(&self, name: &str) -> Result<Option<RepositoryRecord>> {
        self.with_conn(|conn| RepositoryRecord::find_by_name(conn, name))
    }

    /// All configured repositories, highest priority first
    pub fn list_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        self.with_conn(RepositoryRecord::list_all)
    }

    /// Enabled repositories only, highest priority first
    pub fn list_enabled_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        self.with_conn(RepositoryRecord::list_enabled)
    }

    /// Update a repository configuration record
    pub fn update_repository(&self, record: &RepositoryRecord) -> Result<()> {
        self.with_conn(|conn| record.update(conn))
    }

    /// Delete a repository configuration record
    pub fn delete_repository(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| RepositoryRecord::delete(conn, id))
    }
}
