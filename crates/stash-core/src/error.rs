//! Error types for stash-core

use thiserror::Error;

use crate::api::ApiError;
use crate::auth::CredentialError;
use crate::realtime::ProtocolError;

/// Result type alias using stash-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stash-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A durable write did not complete; the mutation was not recorded
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote API error
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Secure credential storage error
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// Realtime channel error
    #[error("Realtime error: {0}")]
    Realtime(String),
}

impl Error {
    /// Whether a later attempt of the same work may succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Api(error) => error.is_retryable(),
            Self::Database(_) | Self::LibSql(_) | Self::Io(_) | Self::Storage(_) => true,
            _ => false,
        }
    }

    /// Whether the failure means the backend is currently unreachable.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Api(error) if error.is_connectivity())
    }
}

impl From<ProtocolError> for Error {
    fn from(value: ProtocolError) -> Self {
        Self::Realtime(value.to_string())
    }
}
