//! Error types for the chatlog-rust library.
//!
//! Shard-level and decode-level failures are recovered where they happen; only the
//! conditions below ever reach a caller.

use thiserror::Error;

/// Errors that can occur while reading chat storage.
#[derive(Error, Debug)]
pub enum ChatlogError {
    /// A file group was requested that was never registered
    #[error("file group not found: {0}")]
    GroupNotFound(String),

    /// The group pattern matched no file under the data directory
    #[error("no database files matching {pattern} under {path}")]
    NoMatchingFiles {
        /// Directory that was searched
        path: String,
        /// Pattern that matched nothing
        pattern: String,
    },

    /// Every shard of a group failed to open
    #[error("no shards available for group {0}")]
    NoShardsAvailable(String),

    /// A keyed lookup found nothing in any shard
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Kind of entity that was looked up
        kind: String,
        /// Lookup key
        key: String,
    },

    /// No decoder exists for this platform and version
    #[error("unsupported storage variant: {platform} v{version}")]
    UnsupportedVariant {
        /// Host platform name
        platform: String,
        /// Schema major version
        version: u32,
    },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem watcher errors
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Invalid file group pattern
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Rejected query input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

impl ChatlogError {
    /// Shorthand for a keyed miss.
    pub fn not_found(kind: &str, key: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }
}

/// Convenience type alias for Result with ChatlogError
pub type Result<T> = std::result::Result<T, ChatlogError>;

impl From<anyhow::Error> for ChatlogError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatlogError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Other(format!("query task failed: {err}"))
    }
}
