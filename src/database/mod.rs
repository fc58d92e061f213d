//! Database maintenance engine: backup bundles, restore, retention, health
//! probing and full system reset for the inventory store

pub mod artifacts;
pub mod backup;
pub mod backup_naming;
pub mod catalog;
pub mod maintenance;
pub mod probe;
pub mod reset;
pub mod restore;
pub mod retention;
pub mod step;

use std::path::PathBuf;

/// Primary database file name inside a bundle
pub const BUNDLE_DATABASE_FILE: &str = "inventario.db";

/// Directory name prefix shared by every bundle
pub const BUNDLE_PREFIX: &str = "backup_";

/// Database error type for backup/restore operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backup not found")]
    BackupNotFound,

    #[error("Invalid backup bundle {}: primary database file is missing", .0.display())]
    InvalidBundle(PathBuf),

    #[error("Database file not found: {}", .0.display())]
    MissingDatabase(PathBuf),

    #[error("Size mismatch copying {}: expected {expected} bytes, found {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Checkpoint incomplete: database busy, {checkpointed} of {log} log frames written back")]
    CheckpointIncomplete { log: i64, checkpointed: i64 },

    #[error("Database connection is not initialized")]
    NotInitialized,

    #[error("Another maintenance operation is already running")]
    OperationInProgress,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        DatabaseError::Sqlite(error.to_string())
    }
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;
