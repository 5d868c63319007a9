//! Common error types for RallyX

use thiserror::Error;

/// Common result type for RallyX operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across RallyX services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored schema does not match the schema this build understands.
    ///
    /// Fatal at startup: continuing would misread stored scores.
    #[error("Schema version mismatch: database is v{found}, software expects v{expected}")]
    SchemaVersion { found: i64, expected: i64 },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when SQLite reported lock contention that outlasted the busy timeout
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(e) => e.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
