//! Authenticated HTTP transport with single-flight credential refresh.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::oneshot;

use super::{ApiError, ApiRequest, ApiResult};
use crate::auth::{Credentials, SharedCredentialStore};

/// Header carrying the realtime connection identifier
pub const CONNECTION_ID_HEADER: &str = "X-Connection-Id";

/// Transport settings derived from `SyncSettings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Base URL without the `/v1` prefix
    pub base_url: String,
    pub request_timeout: Duration,
    pub resource_timeout: Duration,
}

/// Shared slot for the realtime connection identifier.
#[derive(Debug, Clone, Default)]
pub struct ConnectionIdHandle(Arc<RwLock<Option<String>>>);

impl ConnectionIdHandle {
    pub fn set(&self, connection_id: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(connection_id.into());
    }

    pub fn clear(&self) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<ApiResult<Credentials>>>,
}

#[derive(Debug, Deserialize)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

/// Executes API requests with bearer credentials.
///
/// An authenticated request rejected with 401 is retried at most once, after
/// either picking up credentials refreshed by another caller or performing a
/// refresh. Concurrent refreshes collapse into one network call whose result
/// every caller observes.
#[derive(Clone)]
pub struct AuthenticatedTransport {
    client: Client,
    config: Arc<TransportConfig>,
    credentials: SharedCredentialStore,
    connection_id: ConnectionIdHandle,
    refresh: Arc<Mutex<RefreshState>>,
}

impl AuthenticatedTransport {
    pub fn new(config: TransportConfig, credentials: SharedCredentialStore) -> ApiResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
            credentials,
            connection_id: ConnectionIdHandle::default(),
            refresh: Arc::new(Mutex::new(RefreshState::default())),
        })
    }

    pub fn credentials(&self) -> &SharedCredentialStore {
        &self.credentials
    }

    pub const fn connection_id(&self) -> &ConnectionIdHandle {
        &self.connection_id
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Execute a request and decode its JSON body.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> ApiResult<T> {
        let response = self.execute(request).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Execute a request and discard its body.
    pub async fn execute_empty(&self, request: &ApiRequest) -> ApiResult<()> {
        self.execute(request).await.map(drop)
    }

    /// Execute a request, returning the successful response.
    pub async fn execute(&self, request: &ApiRequest) -> ApiResult<Response> {
        if !request.auth {
            let response = self.send_once(request, None).await?;
            return Self::check_status(response).await;
        }

        let used = self.stored_credentials()?.ok_or_else(|| {
            ApiError::Unauthorized("no stored credentials".to_string())
        })?;
        let response = self.send_once(request, Some(&used.access_token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_status(response).await;
        }

        let fresh = match self.stored_credentials()? {
            Some(current) if current.access_token != used.access_token => {
                tracing::debug!("Credentials changed while request was in flight, retrying");
                current
            }
            _ => self.refresh_credentials().await?,
        };

        let retried = self.send_once(request, Some(&fresh.access_token)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized(
                "request rejected after credential refresh".to_string(),
            ));
        }
        Self::check_status(retried).await
    }

    /// Refresh credentials, joining a refresh already in flight.
    pub async fn refresh_credentials(&self) -> ApiResult<Credentials> {
        let (sender, receiver) = oneshot::channel();
        let leader = {
            let mut state = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
            state.waiters.push(sender);
            !std::mem::replace(&mut state.in_flight, true)
        };

        if leader {
            // Detached so a cancelled caller cannot strand the other waiters
            let transport = self.clone();
            tokio::spawn(async move {
                let outcome = transport.perform_refresh().await;
                let waiters = {
                    let mut state = transport
                        .refresh
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    state.in_flight = false;
                    std::mem::take(&mut state.waiters)
                };
                tracing::debug!("Credential refresh finished for {} waiter(s)", waiters.len());
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }
            });
        }

        receiver.await.map_err(|_| {
            ApiError::RefreshFailed("refresh task ended without a result".to_string())
        })?
    }

    async fn perform_refresh(&self) -> ApiResult<Credentials> {
        match self.request_new_credentials().await {
            Ok(credentials) => {
                tracing::info!("Refreshed credentials");
                Ok(credentials)
            }
            Err(error) if error.is_connectivity() => {
                tracing::info!("Credential refresh postponed, backend unreachable: {}", error);
                Err(error)
            }
            Err(error) => {
                tracing::warn!("Credential refresh failed, signing out: {}", error);
                if let Err(clear_error) = self.credentials.clear() {
                    tracing::error!("Failed to purge credentials: {}", clear_error);
                }
                Err(match error {
                    refresh @ ApiError::RefreshFailed(_) => refresh,
                    other => ApiError::RefreshFailed(other.to_string()),
                })
            }
        }
    }

    async fn request_new_credentials(&self) -> ApiResult<Credentials> {
        let current = self
            .stored_credentials()?
            .ok_or_else(|| ApiError::RefreshFailed("no refresh token stored".to_string()))?;

        let request = ApiRequest::post("auth/refresh")
            .public()
            .json(&serde_json::json!({ "refresh_token": current.refresh_token }))?;
        let response = self.send_once(&request, None).await?;
        let response = Self::check_status(response).await?;
        let tokens: TokenPair = serde_json::from_str(&response.text().await?)?;

        let credentials = Credentials::new(tokens.access_token, tokens.refresh_token);
        self.credentials
            .save(&credentials)
            .map_err(|error| ApiError::RefreshFailed(error.to_string()))?;
        Ok(credentials)
    }

    fn stored_credentials(&self) -> ApiResult<Option<Credentials>> {
        self.credentials
            .load()
            .map_err(|error| ApiError::Unauthorized(error.to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.base_url,
            path.trim_start_matches('/')
        )
    }

    async fn send_once(&self, request: &ApiRequest, token: Option<&str>) -> ApiResult<Response> {
        let timeout = if request.long_running {
            self.config.resource_timeout
        } else {
            self.config.request_timeout
        };

        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .timeout(timeout)
            .header("Accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(connection_id) = self.connection_id.get() {
            builder = builder.header(CONNECTION_ID_HEADER, connection_id);
        }

        tracing::debug!("{} {}", request.method, request.path);
        Ok(builder.send().await?)
    }

    async fn check_status(response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::{AuthUser, CredentialStore, MemoryCredentialStore};

    #[derive(Default)]
    struct ServerState {
        refresh_calls: AtomicUsize,
        me_calls: AtomicUsize,
        refresh_rejects: bool,
        refreshed_token: String,
    }

    async fn me(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> impl IntoResponse {
        state.me_calls.fetch_add(1, Ordering::SeqCst);
        let authorized = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            == Some("Bearer fresh-access");
        let connection = headers
            .get(CONNECTION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        if authorized {
            (
                HttpStatus::OK,
                Json(serde_json::json!({ "id": "user-1", "email": connection })),
            )
        } else {
            (
                HttpStatus::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "unauthorized", "message": "token expired" })),
            )
        }
    }

    async fn refresh(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
        state.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if state.refresh_rejects {
            return (
                HttpStatus::UNAUTHORIZED,
                Json(serde_json::json!({ "message": "refresh token revoked" })),
            );
        }
        (
            HttpStatus::OK,
            Json(serde_json::json!({
                "access_token": state.refreshed_token,
                "refresh_token": "fresh-refresh",
            })),
        )
    }

    async fn spawn_server(state: ServerState) -> (String, Arc<ServerState>) {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/v1/auth/me", get(me))
            .route("/v1/auth/refresh", post(refresh))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{address}"), state)
    }

    fn transport(base_url: String, store: Arc<MemoryCredentialStore>) -> AuthenticatedTransport {
        AuthenticatedTransport::new(
            TransportConfig {
                base_url,
                request_timeout: Duration::from_secs(5),
                resource_timeout: Duration::from_secs(10),
            },
            store,
        )
        .unwrap()
    }

    fn stale_store() -> Arc<MemoryCredentialStore> {
        Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "stale-access",
            "old-refresh",
        )))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_unauthorized_calls_share_one_refresh() {
        let (base_url, state) = spawn_server(ServerState {
            refreshed_token: "fresh-access".to_string(),
            ..ServerState::default()
        })
        .await;
        let store = stale_store();
        let transport = transport(base_url, store.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let transport = transport.clone();
            handles.push(tokio::spawn(async move {
                transport
                    .execute_json::<AuthUser>(&ApiRequest::get("auth/me"))
                    .await
            }));
        }
        for handle in handles {
            let user = handle.await.unwrap().unwrap();
            assert_eq!(user.id, "user-1");
        }

        assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.load().unwrap(),
            Some(Credentials::new("fresh-access", "fresh-refresh"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_unauthorized_is_retried_only_once() {
        let (base_url, state) = spawn_server(ServerState {
            refreshed_token: "still-wrong".to_string(),
            ..ServerState::default()
        })
        .await;
        let transport = transport(base_url, stale_store());

        let error = transport
            .execute_json::<AuthUser>(&ApiRequest::get("auth/me"))
            .await
            .unwrap_err();

        assert!(matches!(error, ApiError::Unauthorized(_)));
        assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.me_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_refresh_purges_credentials_for_every_waiter() {
        let (base_url, state) = spawn_server(ServerState {
            refresh_rejects: true,
            ..ServerState::default()
        })
        .await;
        let store = stale_store();
        let transport = transport(base_url, store.clone());

        let first_request = ApiRequest::get("auth/me");
        let second_request = ApiRequest::get("auth/me");
        let (first, second) = tokio::join!(
            transport.execute_json::<AuthUser>(&first_request),
            transport.execute_json::<AuthUser>(&second_request),
        );

        for outcome in [first, second] {
            assert!(matches!(
                outcome,
                Err(ApiError::RefreshFailed(_) | ApiError::Unauthorized(_))
            ));
        }
        assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_refresh_keeps_credentials() {
        let store = stale_store();
        let transport = transport("http://127.0.0.1:9".to_string(), store.clone());

        let error = transport.refresh_credentials().await.unwrap_err();

        assert!(error.is_connectivity());
        assert_eq!(
            store.load().unwrap(),
            Some(Credentials::new("stale-access", "old-refresh"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connection_id_is_sent_when_known() {
        let (base_url, _state) = spawn_server(ServerState::default()).await;
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "fresh-access",
            "refresh",
        )));
        let transport = transport(base_url, store);
        transport.connection_id().set("conn-42");

        let user: AuthUser = transport
            .execute_json(&ApiRequest::get("auth/me"))
            .await
            .unwrap();
        assert_eq!(user.email.as_deref(), Some("conn-42"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_backend_is_a_connectivity_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let transport = transport(format!("http://{address}"), stale_store());
        let error = transport
            .execute_empty(&ApiRequest::get("auth/me"))
            .await
            .unwrap_err();
        assert!(error.is_connectivity(), "unexpected error {error:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn authenticated_request_without_credentials_is_rejected_locally() {
        let (base_url, state) = spawn_server(ServerState::default()).await;
        let transport = transport(base_url, Arc::new(MemoryCredentialStore::new()));

        let error = transport
            .execute_empty(&ApiRequest::get("auth/me"))
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::Unauthorized(_)));
        assert_eq!(state.me_calls.load(Ordering::SeqCst), 0);
    }
}
