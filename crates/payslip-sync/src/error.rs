use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operator-facing category of a per-file or durability problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// File type not recognized.
    ClassificationAmbiguous,
    /// Missing required column, unreadable workbook or unresolved employee.
    ValidationFailed,
    /// Some rows of an accepted spreadsheet were skipped.
    PartialRowFailure,
    /// The file could not be moved out of the watched directory.
    RelocationFailed,
    /// The employee directory could not be persisted.
    StoreWriteFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ClassificationAmbiguous => "classification ambiguous",
            Self::ValidationFailed => "validation failed",
            Self::PartialRowFailure => "partial row failure",
            Self::RelocationFailed => "relocation failed",
            Self::StoreWriteFailed => "store write failed",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Workbook error: {0}")]
    Workbook(#[from] WorkbookError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Failed to install signal handler: {0}")]
    Signal(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Failed to serialize diagnostic: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors reported by an [`EmployeeStore`](crate::directory::EmployeeStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Durability warning: the listed records are still dirty in memory.
    #[error("Store write failed after {attempts} attempts, {pending} records left unflushed: {reason}")]
    StoreWriteFailed {
        attempts: u32,
        pending: usize,
        reason: String,
    },

    #[error("Failed to load employees from store: {0}")]
    StoreReadFailed(#[source] StoreError),
}

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("Failed to read workbook '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not a workbook container")]
    NotAWorkbook(PathBuf),

    #[error("Failed to open workbook archive: {0}")]
    Archive(String),

    #[error("Workbook part '{0}' is missing")]
    MissingPart(String),

    #[error("XML parsing error in '{part}': {reason}")]
    Xml { part: String, reason: String },

    #[error("Cell reference '{0}' is beyond the last worksheet column")]
    ColumnOutOfRange(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Ingestion service is already running")]
    AlreadyRunning,

    #[error("Ingestion service is disabled")]
    Disabled,

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Watched directory '{0}' is not accessible")]
    WatchedDirectoryUnavailable(PathBuf),
}

pub type Result<T> = std::result::Result<T, SyncError>;
