//! Error types for the C++ code-intelligence core
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages. Storage errors additionally
//! carry a classification that the cache orchestrator uses to decide between
//! retry, repair, and backend fallback.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing and lifecycle operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Parsing errors
    #[error("Failed to parse '{path}': {reason}")]
    ParseFailed { path: PathBuf, reason: String },

    /// Storage errors bubbling up through the orchestrator
    #[error("Storage backend failed during {operation}: {source}")]
    Storage {
        operation: &'static str,
        source: StorageError,
    },

    /// Lifecycle errors
    #[error("Operation not allowed in state {state}: {reason}")]
    InvalidState { state: String, reason: String },

    #[error("Indexing was cancelled")]
    Cancelled,

    #[error("Indexing already in progress")]
    AlreadyIndexing,

    #[error("No project directory has been set")]
    NoProject,

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    /// General errors for cases where a structured variant would add nothing
    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Storage { .. } => vec![
                "The cache orchestrator will retry or fall back automatically",
                "Run 'cppscout index --force' to rebuild the cache from scratch",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::AlreadyIndexing => vec![
                "Wait for the current indexing run with 'wait_for_indexing'",
                "Check progress with 'get_indexing_status'",
            ],
            Self::NoProject => {
                vec!["Call 'set_project_directory' before issuing queries"]
            }
            Self::Cancelled => vec![
                "Re-run the indexing operation",
                "Previously indexed files remain cached and will be skipped",
            ],
            _ => vec![],
        }
    }
}

/// Broad classification of storage failures.
///
/// The orchestrator maps each class to a recovery strategy: corruption gets
/// backup + repair, resource exhaustion gets a cache clear, transient lock
/// errors are retried and merely counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorClass {
    Corruption,
    Permission,
    DiskFull,
    LockTimeout,
    Transient,
    Schema,
    Other,
}

/// Errors specific to storage backend operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Document store error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "Cache schema version {found} is newer than supported version {supported}. \
         Update the application or delete the cache."
    )]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("Schema migration to version {version} failed: {cause}")]
    MigrationFailed { version: i64, cause: String },

    #[error("Store appears to be corrupted: {reason}")]
    Corrupted { reason: String },

    #[error("Database is locked and retries were exhausted")]
    LockExhausted,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Classify this error for the orchestrator's recovery logic.
    pub fn class(&self) -> StorageErrorClass {
        match self {
            Self::Corrupted { .. } => StorageErrorClass::Corruption,
            Self::LockExhausted => StorageErrorClass::LockTimeout,
            Self::SchemaTooNew { .. } | Self::MigrationFailed { .. } => StorageErrorClass::Schema,
            Self::Io { source, .. } => classify_io(source),
            Self::Sqlite(e) => classify_sqlite(e),
            Self::Json(_) => StorageErrorClass::Transient,
            Self::Unavailable(_) => StorageErrorClass::Other,
        }
    }

    /// Recoverable errors are counted and retried; non-recoverable errors
    /// trigger immediate recovery attempts (repair, cache clear, fallback).
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.class(),
            StorageErrorClass::Corruption
                | StorageErrorClass::Permission
                | StorageErrorClass::DiskFull
        )
    }
}

fn classify_io(e: &std::io::Error) -> StorageErrorClass {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::PermissionDenied => StorageErrorClass::Permission,
        ErrorKind::StorageFull => StorageErrorClass::DiskFull,
        _ => StorageErrorClass::Transient,
    }
}

fn classify_sqlite(e: &rusqlite::Error) -> StorageErrorClass {
    use rusqlite::ffi::ErrorCode;
    match e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => StorageErrorClass::Corruption,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageErrorClass::LockTimeout,
            ErrorCode::DiskFull => StorageErrorClass::DiskFull,
            ErrorCode::PermissionDenied | ErrorCode::ReadOnly => StorageErrorClass::Permission,
            _ => StorageErrorClass::Transient,
        },
        _ => StorageErrorClass::Transient,
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
