//! Signed-in sync session wiring every engine component together.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, AuthenticatedTransport, RemoteApi};
use crate::auth::{AuthService, SharedCredentialStore};
use crate::config::SyncSettings;
use crate::editor::LocalEditor;
use crate::error::{Error, Result};
use crate::media::MediaPipeline;
use crate::realtime::RealtimeChannel;
use crate::services::LocalStore;
use crate::sync::{
    DeferredReconciliationQueue, PendingOperationLog, SyncOrchestrator, SyncOutcome,
};

struct Background {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the engine components of one account on one device.
pub struct SyncSession {
    store: LocalStore,
    log: PendingOperationLog,
    transport: AuthenticatedTransport,
    auth: AuthService,
    deferred: DeferredReconciliationQueue,
    realtime: Option<RealtimeChannel>,
    orchestrator: Arc<SyncOrchestrator>,
    editor: LocalEditor,
    background: Mutex<Option<Background>>,
}

impl SyncSession {
    /// Open the local database at `db_path` and build the session.
    pub async fn open(
        settings: &SyncSettings,
        db_path: impl Into<PathBuf>,
        credentials: SharedCredentialStore,
        media: Arc<dyn MediaPipeline>,
    ) -> Result<Self> {
        let store = LocalStore::open_path(db_path).await?;
        Self::with_store(settings, store, credentials, media)
    }

    /// Build the session on top of an already opened store.
    pub fn with_store(
        settings: &SyncSettings,
        store: LocalStore,
        credentials: SharedCredentialStore,
        media: Arc<dyn MediaPipeline>,
    ) -> Result<Self> {
        let transport_config = settings
            .transport_config()
            .map_err(Error::InvalidInput)?;
        let transport = AuthenticatedTransport::new(transport_config, credentials)?;
        let remote: Arc<dyn RemoteApi> = Arc::new(ApiClient::new(transport.clone()));

        let log = PendingOperationLog::spawn(store.clone());
        let deferred = DeferredReconciliationQueue::new(
            store.clone(),
            Arc::clone(&media),
            settings.reconcile_config(),
        );
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            log.clone(),
            remote,
            deferred.clone(),
            media,
            settings.orchestrator_config(),
        ));
        let realtime = settings.resolved_realtime_url().map(|url| {
            RealtimeChannel::new(url, transport.clone(), settings.reconnect_policy())
        });

        Ok(Self {
            editor: LocalEditor::new(store.clone(), log.clone()),
            auth: AuthService::new(transport.clone()),
            store,
            log,
            transport,
            deferred,
            realtime,
            orchestrator,
            background: Mutex::new(None),
        })
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn editor(&self) -> &LocalEditor {
        &self.editor
    }

    pub const fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub const fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub const fn realtime(&self) -> Option<&RealtimeChannel> {
        self.realtime.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run one incremental sync cycle now.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        self.orchestrator.run_incremental_sync().await
    }

    /// Run the initial sync, connect realtime and start the background loops.
    ///
    /// Does nothing while signed out or already started. An unreachable
    /// backend is not an error; the loops pick up once it comes back.
    pub async fn start(&self) -> Result<()> {
        if !self.auth.is_authenticated() {
            tracing::info!("Not signed in, sync session stays idle");
            return Ok(());
        }
        if self.is_started() {
            return Ok(());
        }

        match self.orchestrator.run_initial_sync().await {
            Ok(_) => {}
            Err(error) if error.is_connectivity() => {
                tracing::info!("Starting offline: {}", error);
            }
            Err(error) => return Err(error),
        }

        let shutdown = CancellationToken::new();
        let mut handles = Vec::with_capacity(2);
        if let Some(channel) = &self.realtime {
            let events = channel.subscribe();
            handles.push(tokio::spawn(
                Arc::clone(&self.orchestrator).pump_realtime(events, shutdown.clone()),
            ));
            channel.connect()?;
        }
        handles.push(tokio::spawn(
            Arc::clone(&self.orchestrator).run_periodic(shutdown.clone()),
        ));

        *self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Background { shutdown, handles });
        tracing::info!("Sync session started");
        Ok(())
    }

    /// Stop the background loops and disconnect realtime.
    pub async fn stop(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(background) = background {
            background.shutdown.cancel();
            for handle in background.handles {
                if let Err(error) = handle.await {
                    tracing::warn!("Background sync task ended abnormally: {}", error);
                }
            }
        }
        if let Some(channel) = &self.realtime {
            channel.disconnect().await;
        }
    }

    /// Sign out and forget every piece of account state on this device.
    ///
    /// Local state is cleared before the server is told, so a failed remote
    /// logout never leaves the device half signed in.
    pub async fn logout(&self) -> Result<()> {
        self.stop().await;
        let credentials = self.transport.credentials().load().ok().flatten();

        self.log.clear().await?;
        self.deferred.clear().await;
        self.store.clear_sync_state().await?;
        self.store.wipe_entities().await?;
        self.transport.credentials().clear()?;
        self.transport.connection_id().clear();
        tracing::info!("Local account state cleared");

        if let Some(credentials) = credentials {
            if let Err(error) = self.auth.logout(&credentials).await {
                tracing::warn!("Server logout failed: {}", error);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, MemoryCredentialStore};
    use crate::editor::MessageDraft;
    use crate::media::NoopMediaPipeline;
    use pretty_assertions::assert_eq;

    fn settings() -> SyncSettings {
        SyncSettings {
            api_base_url: Some("http://127.0.0.1:9".to_string()),
            request_timeout_secs: 2,
            ..SyncSettings::default()
        }
    }

    async fn session(credentials: SharedCredentialStore) -> SyncSession {
        let store = LocalStore::open_in_memory().await.unwrap();
        SyncSession::with_store(&settings(), store, credentials, Arc::new(NoopMediaPipeline))
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_api_url_is_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let result = SyncSession::with_store(
            &SyncSettings::default(),
            store,
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(NoopMediaPipeline),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_while_signed_out_stays_idle() {
        let session = session(Arc::new(MemoryCredentialStore::new())).await;

        session.start().await.unwrap();

        assert!(!session.is_started());
        assert!(session.realtime().is_some_and(|channel| !channel.is_running()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_clears_all_account_state() {
        let credentials: SharedCredentialStore = Arc::new(MemoryCredentialStore::with_credentials(
            Credentials::new("access", "refresh"),
        ));
        let session = session(credentials.clone()).await;
        let tab = session.editor().create_tab("Private").await.unwrap();
        session
            .editor()
            .create_message(MessageDraft::text(Some(tab.local_id), "secret"))
            .await
            .unwrap();
        session.store().set_watermark(42).await.unwrap();
        session.store().mark_initial_sync_complete().await.unwrap();

        session.logout().await.unwrap();

        assert_eq!(session.editor().pending_count().await.unwrap(), 0);
        assert!(session.store().list_tabs().await.unwrap().is_empty());
        assert!(session.store().list_all_messages().await.unwrap().is_empty());
        assert_eq!(session.store().watermark().await.unwrap(), None);
        assert!(!session.store().initial_sync_complete().await.unwrap());
        assert_eq!(credentials.load().unwrap(), None);
        assert!(!session.is_started());
    }
}
