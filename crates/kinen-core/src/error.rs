//! Error types for kinen-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using kinen-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kinen-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record, mutation, or conflict not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local storage engine failure (disk, quota, corrupt row)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote authority error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl Error {
    /// Whether this error came from the local storage engine rather than the
    /// remote authority or caller input.
    pub const fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Sqlite(_) | Self::Io(_) | Self::Storage(_)
        )
    }
}
