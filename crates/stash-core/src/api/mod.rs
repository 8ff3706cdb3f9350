//! Remote API access: authenticated transport, wire types and typed client.

mod client;
mod transport;
mod types;

pub use client::ApiClient;
pub use transport::{AuthenticatedTransport, ConnectionIdHandle, TransportConfig};
pub use types::{
    ChangeSet, CreateMessageRequest, CreateTabRequest, EntityChanges, IdMapping,
    InitialSyncMessage, InitialSyncRequest, InitialSyncResponse, InitialSyncStatus,
    InitialSyncTab, RemoteMessage, RemoteTab, UpdateMessageRequest, UpdateTabRequest,
    UploadTarget,
};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Errors returned by the remote API.
///
/// Payloads are rendered strings so the error can be cloned to every waiter
/// of a shared credential refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network unavailable: {0}")]
    Offline(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("Not authenticated: {0}")]
    Unauthorized(String),
    #[error("Credential refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Request rejected: {message} ({status})")]
    Validation { status: u16, message: String },
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Server error: {message} ({status})")]
    Server { status: u16, message: String },
    #[error("Failed to decode response: {0}")]
    Decoding(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Whether the caller may retry the same request later.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Offline(_) | Self::Timeout(_) | Self::RateLimited(_) | Self::Server { .. }
        )
    }

    /// Whether the backend was unreachable.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Offline(_) | Self::Timeout(_))
    }

    /// Whether the server reported the resource as missing.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Map a non-success HTTP status and body to an error.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = parse_api_error(status, body);
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized(message),
            StatusCode::NOT_FOUND => Self::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited(message),
            status if status.is_server_error() => Self::Server {
                status: status.as_u16(),
                message,
            },
            status => Self::Validation {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_builder() {
            Self::InvalidUrl(error.to_string())
        } else if error.is_decode() {
            Self::Decoding(error.to_string())
        } else {
            Self::Offline(error.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decoding(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorResponse>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        crate::util::compact_text(trimmed)
    }
}

/// A request against the `/v1` API, reusable across a refresh-and-retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Attach bearer credentials
    pub auth: bool,
    /// Use the resource timeout instead of the request timeout
    pub long_running: bool,
}

impl ApiRequest {
    /// Create an authenticated request.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            auth: true,
            long_running: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn json<T: serde::Serialize + ?Sized>(mut self, body: &T) -> ApiResult<Self> {
        self.body = Some(serde_json::to_value(body).map_err(|error| {
            ApiError::Validation {
                status: 0,
                message: format!("unserializable request body: {error}"),
            }
        })?);
        Ok(self)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Mark the request as not requiring credentials.
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.auth = false;
        self
    }

    #[must_use]
    pub const fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }
}

/// Remote operations the sync engine depends on.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_tab(&self, request: &CreateTabRequest) -> ApiResult<RemoteTab>;
    async fn update_tab(&self, server_id: &str, request: &UpdateTabRequest)
        -> ApiResult<RemoteTab>;
    async fn delete_tab(&self, server_id: &str) -> ApiResult<()>;

    async fn create_message(&self, request: &CreateMessageRequest) -> ApiResult<RemoteMessage>;
    async fn update_message(
        &self,
        server_id: &str,
        request: &UpdateMessageRequest,
    ) -> ApiResult<RemoteMessage>;
    async fn delete_message(&self, server_id: &str) -> ApiResult<()>;

    /// Whether the account already completed its initial bulk upload.
    async fn initial_sync_status(&self) -> ApiResult<InitialSyncStatus>;
    /// Upload a local snapshot in one request.
    async fn initial_sync(&self, request: &InitialSyncRequest) -> ApiResult<InitialSyncResponse>;
    /// Fetch every remote change since `since` (Unix ms), or all of them.
    async fn fetch_changes(&self, since: Option<i64>) -> ApiResult<ChangeSet>;
}
