//! Error types shared by the store, index, segment and log.

use thiserror::Error;

/// Result type alias using LogError
pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Offset or store position outside what has been written, or below
    /// the truncation point.
    #[error("offset out of range: {0}")]
    OutOfRange(u64),

    /// Index lookup past the last written entry.
    #[error("index entry not found for relative offset {0}")]
    NotFound(u32),

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("log is closed")]
    Closed,

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}
