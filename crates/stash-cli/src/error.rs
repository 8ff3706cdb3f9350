use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stash_core::Error),
    #[error(transparent)]
    Api(#[from] stash_core::api::ApiError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No message content provided")]
    EmptyContent,
    #[error("Tab title cannot be empty")]
    EmptyTitle,
    #[error("Identifier cannot be empty")]
    EmptyIdentifier,
    #[error("No {0} found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousIdentifier(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync is not configured. Run `stash config init --api-base-url <URL>` or set STASH_API_URL.")]
    SyncNotConfigured,
    #[error("Not signed in. Run `stash auth login --email <EMAIL> --password <PASSWORD>` first.")]
    NotSignedIn,
}
