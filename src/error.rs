// src/error.rs

use thiserror::Error;

/// Core error types for Pallet
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with added context (extraction, file removal, ...)
    #[error("I/O error: {0}")]
    IoError(String),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Repository synchronization failure
    #[error("Failed syncing repository: {0}")]
    SyncError(String),

    /// Unsatisfiable dependency or conflict constraints
    #[error("Resolution error: {0}")]
    ResolutionError(String),

    /// Requested entity absent from the world or the database
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Uninstall target is not recorded as installed
    #[error("Package not installed: {0}")]
    NotInstalledError(String),

    /// Zero or ambiguous artifact match, or an empty compile spec
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// Download failure
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Checksum verification failure
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Parsing failure (metadata, timestamps, YAML documents)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Conflicting operation (e.g. duplicate repository name)
    #[error("Conflict: {0}")]
    ConflictError(String),

    /// Nonzero exit from a finalizer shell command
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// One or more worker jobs failed; completed jobs keep their state
    #[error("{} install job(s) failed: {}", .failed.len(), .failed.join("; "))]
    JobsFailed { failed: Vec<String> },
}

/// Result type alias using Pallet's Error type
pub type Result<T> = std::result::Result<T, Error>;
