//! Remote authority clients
//!
//! The sync engine only needs four CRUD calls from the authority. Failures are
//! classified so the orchestrator can tell retryable errors from permanent ones.

mod http;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Record, RecordId};

pub use http::HttpRemote;
pub use memory::{InMemoryRemote, InjectedFailure, RemoteCall};

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connectivity lost or the request timed out
    #[error("Network error: {0}")]
    Network(String),
    /// 5xx from the authority
    #[error("Server error: {message} ({status})")]
    Server { status: u16, message: String },
    /// 4xx other than 404
    #[error("Request rejected: {message} ({status})")]
    Client { status: u16, message: String },
    #[error("Entity not found")]
    NotFound,
    /// The authority sent something we cannot use, or refused our payload shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Server { .. } => true,
            Self::Client { .. }
            | Self::NotFound
            | Self::InvalidPayload(_)
            | Self::InvalidConfiguration(_) => false,
            Self::Http(error) => {
                error.is_timeout() || error.is_connect() || error.is_request()
            }
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// CRUD contract of the remote authority.
///
/// Implementations must be safe to share between the drain pass and the
/// retry driver.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// `POST /entities`; returns the record under its canonical id.
    async fn create(&self, record: &Record) -> RemoteResult<Record>;

    /// `GET /entities/{id}`
    async fn fetch(&self, id: &RecordId) -> RemoteResult<Record>;

    /// `PUT /entities/{id}`; returns the stored copy.
    async fn update(&self, record: &Record) -> RemoteResult<Record>;

    /// `DELETE /entities/{id}`; a missing entity is reported as `NotFound`.
    async fn delete(&self, id: &RecordId) -> RemoteResult<()>;
}
