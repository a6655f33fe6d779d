//! Database backup, restore and retention for the rental backend

// Re-export storage module for public use
pub mod storage;

pub mod backup;
pub mod backup_naming;
pub mod ops;
pub mod retention;
pub mod scheduler;

/// Error type for backup/restore operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup file not found: {0}")]
    NotFound(String),

    #[error("External process failed: {0}")]
    ExternalProcess(String),

    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;
