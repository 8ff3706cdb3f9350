//! Reconnecting WebSocket client fanning decoded events out to subscribers.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::protocol::{decode_event, RealtimeEvent};
use crate::api::AuthenticatedTransport;
use crate::error::Result;

const EVENT_BUFFER: usize = 256;

/// Exponential reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts since the last established connection before the channel gives up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

enum SessionError {
    NoCredentials,
    Unauthorized,
    Failed(String),
}

struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    url: String,
    transport: AuthenticatedTransport,
    policy: ReconnectPolicy,
    events: broadcast::Sender<RealtimeEvent>,
    state: watch::Sender<ConnectionState>,
    running: Mutex<Option<Running>>,
}

/// Persistent push connection to the backend.
///
/// `connect` starts a background task that keeps the connection alive with
/// exponential backoff until `disconnect` is called or the attempt cap is
/// reached. Every subscriber receives every decoded event.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl RealtimeChannel {
    pub fn new(
        url: impl Into<String>,
        transport: AuthenticatedTransport,
        policy: ReconnectPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                transport,
                policy,
                events,
                state,
                running: Mutex::new(None),
            }),
        }
    }

    /// Receive every event decoded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether the connection task is alive (connected or retrying).
    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Start the connection task.
    ///
    /// No-op while a task is alive. Returns without connecting when no
    /// credentials are stored.
    pub fn connect(&self) -> Result<()> {
        let mut running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            return Ok(());
        }
        if self.inner.transport.credentials().load()?.is_none() {
            tracing::debug!("No credentials stored, realtime channel not started");
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).run(shutdown.clone()));
        *running = Some(Running { shutdown, handle });
        Ok(())
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&self) {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.shutdown.cancel();
            if let Err(error) = running.handle.await {
                tracing::warn!("Realtime task ended abnormally: {}", error);
            }
        }
        self.inner.transport.connection_id().clear();
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }
}

impl Inner {
    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut attempt = 0_u32;
        loop {
            self.state.send_replace(if attempt == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting { attempt }
            });

            let mut established = false;
            let outcome = tokio::select! {
                () = shutdown.cancelled() => break,
                outcome = self.session(&mut established) => outcome,
            };
            self.transport.connection_id().clear();
            // Every drop of a working connection starts a fresh backoff sequence
            if established {
                attempt = 0;
            }

            match outcome {
                Ok(()) => tracing::info!("Realtime connection closed by server"),
                Err(SessionError::NoCredentials) => {
                    tracing::info!("Credentials gone, realtime channel stopped");
                    break;
                }
                Err(SessionError::Unauthorized) => {
                    tracing::info!("Realtime handshake rejected, refreshing credentials");
                    if let Err(error) = self.transport.refresh_credentials().await {
                        tracing::warn!("Credential refresh for realtime failed: {}", error);
                    }
                }
                Err(SessionError::Failed(message)) => {
                    tracing::warn!("Realtime connection failed: {}", message);
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                tracing::warn!(
                    "Giving up on realtime after {} reconnect attempt(s)",
                    self.policy.max_attempts
                );
                break;
            }
            let delay = self.policy.delay_for(attempt);
            tracing::debug!("Reconnecting realtime in {:?} (attempt {})", delay, attempt);
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.transport.connection_id().clear();
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::debug!("Realtime task stopped");
    }

    /// One connection lifetime; `Ok` when the server closed an established connection.
    ///
    /// `established` is set once the handshake succeeded.
    async fn session(&self, established: &mut bool) -> std::result::Result<(), SessionError> {
        let credentials = self
            .transport
            .credentials()
            .load()
            .map_err(|error| SessionError::Failed(error.to_string()))?
            .ok_or(SessionError::NoCredentials)?;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|error| SessionError::Failed(error.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.access_token))
            .map_err(|error| SessionError::Failed(error.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let mut stream = match connect_async(request).await {
            Ok((stream, _)) => stream,
            Err(tungstenite::Error::Http(response))
                if response.status() == StatusCode::UNAUTHORIZED =>
            {
                return Err(SessionError::Unauthorized);
            }
            Err(error) => return Err(SessionError::Failed(error.to_string())),
        };
        *established = true;
        self.state.send_replace(ConnectionState::Connected);
        tracing::info!("Realtime channel connected");

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.dispatch(text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(error) => return Err(SessionError::Failed(error.to_string())),
            }
        }
        Ok(())
    }

    fn dispatch(&self, text: &str) {
        match decode_event(text) {
            Ok(Some(event)) => {
                if let RealtimeEvent::Connected { connection_id } = &event {
                    tracing::debug!("Realtime connection id {}", connection_id);
                    self.transport.connection_id().set(connection_id.clone());
                }
                if self.events.send(event).is_err() {
                    tracing::debug!("Realtime event dropped, no subscribers");
                }
            }
            Ok(None) => {}
            Err(error) => tracing::warn!("Ignoring malformed realtime frame: {}", error),
        }
    }
}
