//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A JSON column could not be encoded or decoded.
    #[error("JSON column error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row holds a value the model cannot represent.
    #[error("Invalid row '{id}': {reason}")]
    InvalidRow { id: String, reason: String },

    /// An update targeted a row that does not exist.
    #[error("No row with id '{0}'")]
    NotFound(String),

    /// The blocking task running the query panicked or was cancelled.
    #[error("Database task failed: {0}")]
    Task(String),

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
