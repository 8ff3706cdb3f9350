//! Credentials and account operations.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{ApiError, ApiRequest, ApiResult, AuthenticatedTransport};

/// Bearer credentials issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Secure storage error: {0}")]
    Storage(String),
    #[error("Stored credentials are unreadable: {0}")]
    Corrupt(String),
}

/// Secure storage for the credential record.
///
/// Implementations store both tokens as one record so a save either
/// replaces both or neither.
pub trait CredentialStore: Send + Sync + 'static {
    fn load(&self) -> Result<Option<Credentials>, CredentialError>;
    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError>;
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, CredentialError> {
        Ok(self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    user: AuthUser,
}

/// Register, login, logout and profile calls.
#[derive(Clone)]
pub struct AuthService {
    transport: AuthenticatedTransport,
}

impl AuthService {
    pub const fn new(transport: AuthenticatedTransport) -> Self {
        Self { transport }
    }

    /// Whether credentials are currently stored.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.transport.credentials().load(), Ok(Some(_)))
    }

    pub async fn register(&self, email: &str, password: &str) -> ApiResult<AuthUser> {
        self.authenticate("auth/register", email, password).await
    }

    pub async fn login(&self, email: &str, password: &str) -> ApiResult<AuthUser> {
        self.authenticate("auth/login", email, password).await
    }

    /// Fetch the profile of the signed-in user.
    pub async fn me(&self) -> ApiResult<AuthUser> {
        self.transport.execute_json(&ApiRequest::get("auth/me")).await
    }

    /// Revoke the refresh token server side.
    ///
    /// Stored credentials are not touched; the session clears them.
    pub async fn logout(&self, credentials: &Credentials) -> ApiResult<()> {
        let request = ApiRequest::post("auth/logout")
            .public()
            .json(&serde_json::json!({ "refresh_token": credentials.refresh_token }))?;
        self.transport.execute_empty(&request).await
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> ApiResult<AuthUser> {
        validate_login(email, password)?;

        let request = ApiRequest::post(path)
            .public()
            .json(&serde_json::json!({ "email": email.trim(), "password": password }))?;
        let response: AuthResponse = self.transport.execute_json(&request).await?;

        self.transport
            .credentials()
            .save(&Credentials::new(
                response.access_token,
                response.refresh_token,
            ))
            .map_err(|error| ApiError::Unauthorized(error.to_string()))?;

        tracing::info!("Signed in as {}", response.user.id);
        Ok(response.user)
    }
}

fn validate_login(email: &str, password: &str) -> ApiResult<()> {
    let invalid = |message: &str| ApiError::Validation {
        status: 0,
        message: message.to_string(),
    };
    if email.trim().is_empty() {
        return Err(invalid("Email is required"));
    }
    if password.trim().is_empty() {
        return Err(invalid("Password is required"));
    }
    Ok(())
}

/// Shared handle for stores injected into several components.
pub type SharedCredentialStore = Arc<dyn CredentialStore>;
