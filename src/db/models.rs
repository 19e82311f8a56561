// src/db/models.rs

//! Row models for Pallet database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::{Error, Result};
use crate::package::{Package, PackageId};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// An installed package record, keyed by fingerprint
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub id: Option<i64>,
    pub fingerprint: String,
    pub name: String,
    pub category: String,
    pub version: String,
    /// Dependency edges persisted as a JSON list of identities
    pub requires: String,
    /// Conflict edges persisted as a JSON list of identities
    pub conflicts: String,
    pub installed_at: Option<String>,
}

impl PackageRecord {
    /// Build a record from a package definition
    pub fn from_package(package: &Package) -> Result<Self> {
        Ok(Self {
            id: None,
            fingerprint: package.fingerprint(),
            name: package.id.name.clone(),
            category: package.id.category.clone(),
            version: package.id.version.clone(),
            requires: serde_json::to_string(&package.requires)
                .map_err(|e| Error::ParseError(format!("Failed encoding dependency edges: {}", e)))?,
            conflicts: serde_json::to_string(&package.conflicts)
                .map_err(|e| Error::ParseError(format!("Failed encoding conflict edges: {}", e)))?,
            installed_at: None,
        })
    }

    /// Rehydrate the package definition stored in this record
    pub fn to_package(&self) -> Result<Package> {
        let requires: Vec<PackageId> = serde_json::from_str(&self.requires)
            .map_err(|e| Error::ParseError(format!("Corrupt dependency edges for {}: {}", self.fingerprint, e)))?;
        let conflicts: Vec<PackageId> = serde_json::from_str(&self.conflicts)
            .map_err(|e| Error::ParseError(format!("Corrupt conflict edges for {}: {}", self.fingerprint, e)))?;
        Ok(Package::new(
            PackageId::new(&self.name, &self.category, &self.version),
            requires,
            conflicts,
        ))
    }

    /// Insert this package record into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (fingerprint, name, category, version, requires, conflicts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.fingerprint,
                &self.name,
                &self.category,
                &self.version,
                &self.requires,
                &self.conflicts,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a package record by fingerprint
    pub fn find_by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, fingerprint, name, category, version, requires, conflicts, installed_at
             FROM packages WHERE fingerprint = ?1",
        )?;

        let record = stmt.query_row([fingerprint], Self::from_row).optional()?;

        Ok(record)
    }

    /// List all installed package records, ordered for determinism
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, fingerprint, name, category, version, requires, conflicts, installed_at
             FROM packages ORDER BY category, name, version",
        )?;

        let records = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Update the stored edges for an existing fingerprint
    pub fn update(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE packages SET name = ?1, category = ?2, version = ?3, requires = ?4, conflicts = ?5
             WHERE fingerprint = ?6",
            params![
                &self.name,
                &self.category,
                &self.version,
                &self.requires,
                &self.conflicts,
                &self.fingerprint,
            ],
        )?;

        Ok(())
    }

    /// Delete a package record by fingerprint
    pub fn delete(conn: &Connection, fingerprint: &str) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE fingerprint = ?1", [fingerprint])?;
        Ok(())
    }

    /// Convert a database row to a PackageRecord
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            fingerprint: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            version: row.get(4)?,
            requires: row.get(5)?,
            conflicts: row.get(6)?,
            installed_at: row.get(7)?,
        })
    }
}

/// File paths recorded against an installed package fingerprint
pub struct FileRecord;

impl FileRecord {
    /// Replace the recorded file list for a fingerprint
    pub fn set(conn: &Connection, fingerprint: &str, files: &[String]) -> Result<()> {
        conn.execute(
            "DELETE FROM package_files WHERE fingerprint = ?1",
            [fingerprint],
        )?;

        let mut stmt = conn.prepare(
            "INSERT INTO package_files (fingerprint, path, seq) VALUES (?1, ?2, ?3)",
        )?;
        for (seq, path) in files.iter().enumerate() {
            stmt.execute(params![fingerprint, path, seq as i64])?;
        }
        Ok(())
    }

    /// Fetch the recorded file list for a fingerprint, in recorded order
    pub fn get(conn: &Connection, fingerprint: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT path FROM package_files WHERE fingerprint = ?1 ORDER BY seq",
        )?;

        let files = stmt
            .query_map([fingerprint], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Remove the recorded file list for a fingerprint
    pub fn remove(conn: &Connection, fingerprint: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM package_files WHERE fingerprint = ?1",
            [fingerprint],
        )?;
        Ok(())
    }
}

/// Repository represents a remote package source
#[derive(Debug, Clone)]
pub struct RepositoryRecord {
    pub id: Option<i64>,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub priority: i32,
    pub metadata_expire: i32,
    pub last_sync: Option<String>,
    pub created_at: Option<String>,
}

impl RepositoryRecord {
    /// Create a new RepositoryRecord
    pub fn new(name: String, url: String) -> Self {
        Self {
            id: None,
            name,
            url,
            enabled: true,
            priority: 0,
            metadata_expire: 3600, // Default: 1 hour
            last_sync: None,
            created_at: None,
        }
    }

    /// Insert this repository into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO repositories (name, url, enabled, priority, metadata_expire)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.name,
                &self.url,
                self.enabled as i32,
                &self.priority,
                &self.metadata_expire,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a repository by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, url, enabled, priority, metadata_expire, last_sync, created_at
             FROM repositories WHERE name = ?1",
        )?;

        let repo = stmt.query_row([name], Self::from_row).optional()?;

        Ok(repo)
    }

    /// List all repositories, highest priority first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, url, enabled, priority, metadata_expire, last_sync, created_at
             FROM repositories ORDER BY priority DESC, name",
        )?;

        let repos = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(repos)
    }

    /// List enabled repositories, highest priority first
    pub fn list_enabled(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, url, enabled, priority, metadata_expire, last_sync, created_at
             FROM repositories WHERE enabled = 1 ORDER BY priority DESC, name",
        )?;

        let repos = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(repos)
    }

    /// Update repository metadata
    pub fn update(&self, conn: &Connection) -> Result<()> {
        let id = self.id.ok_or_else(|| {
            Error::InitError("Cannot update repository without ID".to_string())
        })?;

        conn.execute(
            "UPDATE repositories SET name = ?1, url = ?2, enabled = ?3, priority = ?4,
             metadata_expire = ?5, last_sync = ?6 WHERE id = ?7",
            params![
                &self.name,
                &self.url,
                self.enabled as i32,
                &self.priority,
                &self.metadata_expire,
                &self.last_sync,
                id,
            ],
        )?;

        Ok(())
    }

    /// Delete a repository by ID
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM repositories WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Convert a database row to a RepositoryRecord
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            url: row.get(2)?,
            enabled: row.get::<_, i32>(3)? != 0,
            priority: row.get(4)?,
            metadata_expire: row.get(5)?,
            last_sync: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}
