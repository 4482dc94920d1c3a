use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] kinen_core::Error),
    #[error(transparent)]
    Remote(#[from] kinen_core::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record name provided")]
    EmptyName,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Invalid field assignment '{0}'; expected KEY=VALUE")]
    InvalidAssignment(String),
    #[error("No pending conflict with id {0}")]
    ConflictNotFound(String),
    #[error(
        "Sync is not configured. Set KINEN_REMOTE_URL (and KINEN_REMOTE_TOKEN if needed) or add remote_url to the config file."
    )]
    SyncNotConfigured,
}
