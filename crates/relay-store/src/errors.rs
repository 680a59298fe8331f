//! Error types for the storage subsystem.
//!
//! [`StoreError`] is the single error type returned by both collaborator
//! interfaces. The surface is small enough for exhaustive matching while
//! still distinguishing the failure modes the relay cares about: a rejected
//! write suppresses the broadcast, a failed membership lookup aborts one
//! fan-out, and neither tears down any connection.

use thiserror::Error;

/// Errors from message persistence and membership lookup.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// Requested chat was not found.
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    /// Internal error (e.g. a deliberately failing test double).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
