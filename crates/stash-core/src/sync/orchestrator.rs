//! Sync orchestrator: initial upload, incremental pull and queue drain.
//!
//! The three flows share one "syncing" flag; a trigger that finds it set
//! returns `SyncOutcome::Skipped` without waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::apply::{self, MessageApplied, TabApplied, UnresolvedParent};
use super::{DeferredReconciliationQueue, PendingOperationLog};
use crate::api::{
    ApiError, ChangeSet, CreateMessageRequest, CreateTabRequest, InitialSyncMessage,
    InitialSyncRequest, InitialSyncTab, RemoteApi, UpdateMessageRequest, UpdateTabRequest,
    UploadTarget,
};
use crate::error::Result;
use crate::media::MediaPipeline;
use crate::models::{EntityKind, LocalId, Message, OperationKind, PendingOperation, Tab};
use crate::realtime::RealtimeEvent;
use crate::services::LocalStore;
use crate::state::SyncState;

const DEFAULT_MAX_OPERATION_RETRIES: u32 = 5;
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Failed attempts after which a queued operation is dropped
    pub max_operation_retries: u32,
    /// Period of the background incremental sync
    pub sync_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_operation_retries: DEFAULT_MAX_OPERATION_RETRIES,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Result of a sync trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another flow was running
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether the initial bulk upload ran in this cycle
    pub initial_upload: bool,
    pub tabs_applied: usize,
    pub messages_applied: usize,
    pub deletions_applied: usize,
    /// Remote entities that failed to apply locally
    pub apply_failures: usize,
    pub drain: DrainReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub acknowledged: usize,
    pub retried: usize,
    pub dropped: usize,
}

/// Outcome of executing one queued operation
enum Execution {
    Done,
    /// A dependency is not ready; keep the operation and charge a retry
    Blocked(String),
}

struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives every flow that moves state between the local store and the backend.
pub struct SyncOrchestrator {
    store: LocalStore,
    log: PendingOperationLog,
    remote: Arc<dyn RemoteApi>,
    deferred: DeferredReconciliationQueue,
    media: Arc<dyn MediaPipeline>,
    config: OrchestratorConfig,
    syncing: AtomicBool,
    state: watch::Sender<SyncState>,
}

impl SyncOrchestrator {
    pub fn new(
        store: LocalStore,
        log: PendingOperationLog,
        remote: Arc<dyn RemoteApi>,
        deferred: DeferredReconciliationQueue,
        media: Arc<dyn MediaPipeline>,
        config: OrchestratorConfig,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            store,
            log,
            remote,
            deferred,
            media,
            config,
            syncing: AtomicBool::new(false),
            state,
        }
    }

    /// Observe sync state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Upload the local snapshot once per account.
    pub async fn run_initial_sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncOutcome::Skipped);
        };
        let outcome = self.initial_sync_inner().await.map(|initial_upload| SyncReport {
            initial_upload,
            ..SyncReport::default()
        });
        self.finish(outcome)
    }

    /// Pull remote changes, then drain the queue.
    pub async fn run_incremental_sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncOutcome::Skipped);
        };
        let outcome = self.incremental_sync_inner().await;
        self.finish(outcome)
    }

    /// Push queued local mutations without pulling.
    pub async fn drain_queue(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncOutcome::Skipped);
        };
        let outcome = self.drain_inner().await.map(|drain| SyncReport {
            drain,
            ..SyncReport::default()
        });
        self.finish(outcome)
    }

    fn try_begin(&self) -> Option<SyncGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.state.send_replace(SyncState::Syncing);
        Some(SyncGuard(&self.syncing))
    }

    fn finish(&self, outcome: Result<SyncReport>) -> Result<SyncOutcome> {
        match outcome {
            Ok(report) => {
                self.state.send_replace(SyncState::Synced);
                Ok(SyncOutcome::Completed(report))
            }
            Err(error) => {
                if error.is_connectivity() {
                    tracing::info!("Sync paused, backend unreachable: {}", error);
                    self.state.send_replace(SyncState::Offline);
                } else {
                    tracing::error!("Sync failed: {}", error);
                    self.state.send_replace(SyncState::Error);
                }
                Err(error)
            }
        }
    }

    // Initial sync

    async fn initial_sync_inner(&self) -> Result<bool> {
        if self.store.initial_sync_complete().await? {
            return Ok(false);
        }

        match self.remote.initial_sync_status().await {
            Ok(status) if status.completed => {
                tracing::info!("Server reports initial sync already completed");
                self.store.mark_initial_sync_complete().await?;
                return Ok(false);
            }
            Ok(_) => {}
            Err(ApiError::NotFound(_)) => {
                tracing::info!("Initial sync endpoint unavailable, treating as complete");
                self.store.mark_initial_sync_complete().await?;
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        }

        let tabs = self.store.list_tabs().await?;
        let messages = self.store.list_all_messages().await?;
        let request = InitialSyncRequest {
            tabs: tabs.iter().map(initial_tab).collect(),
            messages: messages.iter().map(initial_message).collect(),
        };
        tracing::info!(
            "Uploading {} tab(s) and {} message(s) for initial sync",
            request.tabs.len(),
            request.messages.len()
        );

        let response = match self.remote.initial_sync(&request).await {
            Ok(response) => response,
            Err(ApiError::NotFound(_)) => {
                tracing::info!("Initial sync endpoint unavailable, treating as complete");
                self.store.mark_initial_sync_complete().await?;
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        };

        for mapping in &response.tabs {
            self.store
                .assign_tab_server_id(&mapping.local_id, &mapping.server_id)
                .await?;
        }
        for mapping in &response.messages {
            self.store
                .assign_message_server_id(&mapping.local_id, &mapping.server_id)
                .await?;
        }

        let mut targets: HashMap<LocalId, Vec<UploadTarget>> = HashMap::new();
        for target in response.upload_targets {
            targets.entry(target.local_id).or_default().push(target);
        }
        for (local_id, targets) in targets {
            if let Some(message) = self.store.get_message(&local_id).await? {
                self.upload_media(&message, &targets).await;
            }
        }

        self.store.mark_initial_sync_complete().await?;
        tracing::info!(
            "Initial sync mapped {} tab(s) and {} message(s)",
            response.tabs.len(),
            response.messages.len()
        );
        Ok(true)
    }

    // Incremental sync

    async fn incremental_sync_inner(&self) -> Result<SyncReport> {
        let mut report = SyncReport {
            initial_upload: self.initial_sync_inner().await?,
            ..SyncReport::default()
        };

        let since = self.store.watermark().await?;
        let changes = self.remote.fetch_changes(since).await?;
        tracing::debug!(
            "Fetched changes since {:?} (server time {})",
            since,
            changes.server_time
        );

        self.apply_changes(&changes, &mut report).await;
        report.drain = self.drain_inner().await?;

        if report.apply_failures == 0 {
            self.store.set_watermark(changes.server_time).await?;
        } else {
            tracing::warn!(
                "{} remote change(s) failed to apply, keeping watermark for a retry",
                report.apply_failures
            );
        }
        Ok(report)
    }

    /// Tab upserts, message upserts, message deletes, then tab deletes.
    ///
    /// Deleting tabs last means a message created under a tab deleted in
    /// the same batch ends up in the inbox.
    async fn apply_changes(&self, changes: &ChangeSet, report: &mut SyncReport) {
        let mut linked = Vec::new();
        for tab in changes.tabs.created.iter().chain(&changes.tabs.updated) {
            match apply::upsert_tab(&self.store, tab).await {
                Ok(TabApplied::Linked(server_id)) => {
                    report.tabs_applied += 1;
                    linked.push(server_id);
                }
                Ok(TabApplied::Updated) => report.tabs_applied += 1,
                Ok(TabApplied::Unchanged) => {}
                Err(error) => {
                    tracing::warn!("Skipping remote tab {}: {}", tab.id, error);
                    report.apply_failures += 1;
                }
            }
        }

        for message in changes.messages.created.iter().chain(&changes.messages.updated) {
            match apply::upsert_message(&self.store, message, UnresolvedParent::Inbox).await {
                Ok(MessageApplied::Inserted(local)) => {
                    report.messages_applied += 1;
                    self.download_media(&local).await;
                }
                Ok(MessageApplied::Updated(_)) => report.messages_applied += 1,
                Ok(MessageApplied::Unchanged | MessageApplied::Unresolved) => {}
                Err(error) => {
                    tracing::warn!("Skipping remote message {}: {}", message.id, error);
                    report.apply_failures += 1;
                }
            }
        }

        for server_id in &changes.messages.deleted {
            match apply::delete_message(&self.store, server_id).await {
                Ok(true) => report.deletions_applied += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!("Skipping remote deletion of message {}: {}", server_id, error);
                    report.apply_failures += 1;
                }
            }
        }

        for server_id in &changes.tabs.deleted {
            match apply::delete_tab(&self.store, server_id).await {
                Ok(true) => report.deletions_applied += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!("Skipping remote deletion of tab {}: {}", server_id, error);
                    report.apply_failures += 1;
                }
            }
        }

        if !linked.is_empty() && !self.deferred.is_empty().await {
            if let Err(error) = self.deferred.process_pending().await {
                tracing::warn!("Deferred reconciliation after sync failed: {}", error);
            }
        }
    }

    // Queue drain

    async fn drain_inner(&self) -> Result<DrainReport> {
        let mut operations = self.log.all().await?;
        operations.sort_by_key(PendingOperation::drain_key);
        let mut report = DrainReport::default();

        for mut operation in operations {
            let failure = match self.execute(&operation).await {
                Ok(Execution::Done) => {
                    self.log.remove(operation.id).await?;
                    report.acknowledged += 1;
                    continue;
                }
                Ok(Execution::Blocked(reason)) => reason,
                Err(error) if error.is_connectivity() => {
                    tracing::info!(
                        "Backend unreachable, pausing drain at #{}: {}",
                        operation.id,
                        error
                    );
                    return Err(error);
                }
                Err(error) if error.is_retryable() => error.to_string(),
                Err(error) => {
                    tracing::error!(
                        "Dropping {} {} {} after permanent failure: {}",
                        operation.kind,
                        operation.entity,
                        operation.local_id,
                        error
                    );
                    self.log.remove(operation.id).await?;
                    report.dropped += 1;
                    continue;
                }
            };

            operation.retry_count += 1;
            if operation.retry_count > self.config.max_operation_retries {
                tracing::error!(
                    "Dropping {} {} {} after {} attempts: {}",
                    operation.kind,
                    operation.entity,
                    operation.local_id,
                    operation.retry_count,
                    failure
                );
                self.log.remove(operation.id).await?;
                report.dropped += 1;
            } else {
                tracing::debug!(
                    "Will retry {} {} {} (attempt {}): {}",
                    operation.kind,
                    operation.entity,
                    operation.local_id,
                    operation.retry_count,
                    failure
                );
                operation.last_error = Some(failure);
                self.log.update(operation).await?;
                report.retried += 1;
            }
        }

        if report != DrainReport::default() {
            tracing::info!(
                "Drained queue: {} acknowledged, {} pending retry, {} dropped",
                report.acknowledged,
                report.retried,
                report.dropped
            );
        }
        Ok(report)
    }

    async fn execute(&self, operation: &PendingOperation) -> Result<Execution> {
        match (operation.entity, operation.kind) {
            (EntityKind::Tab, OperationKind::Create) => self.create_tab(operation).await,
            (EntityKind::Tab, OperationKind::Update) => self.update_tab(operation).await,
            (EntityKind::Tab, OperationKind::Delete) => self.delete_tab(&operation.local_id).await,
            (EntityKind::Message, OperationKind::Create) => self.create_message(operation).await,
            (EntityKind::Message, OperationKind::Update) => self.update_message(operation).await,
            (EntityKind::Message, OperationKind::Delete) => {
                self.delete_message(&operation.local_id).await
            }
        }
    }

    async fn create_tab(&self, operation: &PendingOperation) -> Result<Execution> {
        let Some(current) = self.store.get_tab(&operation.local_id).await? else {
            return Ok(Execution::Done);
        };
        if current.server_id.is_some() || current.is_deleted {
            return Ok(Execution::Done);
        }

        let snapshot: Tab = serde_json::from_value(operation.payload.clone())?;
        let remote = self
            .remote
            .create_tab(&CreateTabRequest {
                local_id: operation.local_id,
                title: snapshot.title,
                position: snapshot.position,
                created_at: snapshot.created_at,
            })
            .await?;

        if self
            .store
            .assign_tab_server_id(&operation.local_id, &remote.id)
            .await?
        {
            tracing::debug!("Tab {} acknowledged as {}", operation.local_id, remote.id);
            if let Err(error) = self.deferred.notify_tab_created(&remote.id).await {
                tracing::warn!("Deferred reconciliation for tab {} failed: {}", remote.id, error);
            }
        }
        Ok(Execution::Done)
    }

    async fn update_tab(&self, operation: &PendingOperation) -> Result<Execution> {
        let Some(current) = self.store.get_tab(&operation.local_id).await? else {
            return Ok(Execution::Done);
        };
        let Some(server_id) = current.server_id else {
            return Ok(Execution::Blocked(format!(
                "tab {} has no server id yet",
                operation.local_id
            )));
        };

        let snapshot: Tab = serde_json::from_value(operation.payload.clone())?;
        let request = UpdateTabRequest {
            title: snapshot.title,
            position: snapshot.position,
            updated_at: snapshot.updated_at,
        };
        match self.remote.update_tab(&server_id, &request).await {
            Ok(_) => Ok(Execution::Done),
            Err(ApiError::NotFound(_)) => {
                tracing::warn!("Tab {} no longer exists remotely, dropping update", server_id);
                Ok(Execution::Done)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete_tab(&self, local_id: &LocalId) -> Result<Execution> {
        let Some(current) = self.store.get_tab(local_id).await? else {
            return Ok(Execution::Done);
        };
        if let Some(server_id) = &current.server_id {
            match self.remote.delete_tab(server_id).await {
                Ok(()) | Err(ApiError::NotFound(_)) => {}
                Err(error) => return Err(error.into()),
            }
        }
        self.store.purge_tab(local_id).await?;
        Ok(Execution::Done)
    }

    /// Server id of a message's parent tab; `None` when the tab is not acknowledged.
    async fn parent_server_id(&self, tab_local_id: Option<&LocalId>) -> Result<Option<String>> {
        match tab_local_id {
            Some(tab) => self.store.tab_server_id(tab).await,
            None => Ok(None),
        }
    }

    async fn create_message(&self, operation: &PendingOperation) -> Result<Execution> {
        let Some(current) = self.store.get_message(&operation.local_id).await? else {
            return Ok(Execution::Done);
        };
        if current.server_id.is_some() || current.is_deleted {
            return Ok(Execution::Done);
        }

        let snapshot: Message = serde_json::from_value(operation.payload.clone())?;
        let tab_id = self
            .parent_server_id(snapshot.tab_local_id.as_ref())
            .await?;
        if snapshot.tab_local_id.is_some() && tab_id.is_none() {
            tracing::warn!(
                "Parent tab of message {} is not synced, creating it without a tab",
                operation.local_id
            );
        }

        let remote = self
            .remote
            .create_message(&CreateMessageRequest {
                local_id: operation.local_id,
                tab_id,
                text: snapshot.text,
                entities: snapshot.entities,
                media: snapshot.media,
                position: snapshot.position,
                created_at: snapshot.created_at,
            })
            .await?;

        self.store
            .assign_message_server_id(&operation.local_id, &remote.id)
            .await?;
        tracing::debug!("Message {} acknowledged as {}", operation.local_id, remote.id);
        if !current.media.is_empty() {
            self.upload_media(&current, &[]).await;
        }
        Ok(Execution::Done)
    }

    async fn update_message(&self, operation: &PendingOperation) -> Result<Execution> {
        let Some(current) = self.store.get_message(&operation.local_id).await? else {
            return Ok(Execution::Done);
        };
        let Some(server_id) = current.server_id else {
            return Ok(Execution::Blocked(format!(
                "message {} has no server id yet",
                operation.local_id
            )));
        };

        let snapshot: Message = serde_json::from_value(operation.payload.clone())?;
        let tab_id = self
            .parent_server_id(snapshot.tab_local_id.as_ref())
            .await?;
        if snapshot.tab_local_id.is_some() && tab_id.is_none() {
            return Ok(Execution::Blocked(format!(
                "target tab of message {} has no server id yet",
                operation.local_id
            )));
        }

        let request = UpdateMessageRequest {
            tab_id,
            text: snapshot.text,
            entities: snapshot.entities,
            media: snapshot.media,
            position: snapshot.position,
            updated_at: snapshot.updated_at,
        };
        match self.remote.update_message(&server_id, &request).await {
            Ok(_) => Ok(Execution::Done),
            Err(ApiError::NotFound(_)) => {
                tracing::warn!(
                    "Message {} no longer exists remotely, dropping update",
                    server_id
                );
                Ok(Execution::Done)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete_message(&self, local_id: &LocalId) -> Result<Execution> {
        let Some(current) = self.store.get_message(local_id).await? else {
            return Ok(Execution::Done);
        };
        if let Some(server_id) = &current.server_id {
            match self.remote.delete_message(server_id).await {
                Ok(()) | Err(ApiError::NotFound(_)) => {}
                Err(error) => return Err(error.into()),
            }
        }
        self.store.purge_message(local_id).await?;
        Ok(Execution::Done)
    }

    // Media

    async fn upload_media(&self, message: &Message, targets: &[UploadTarget]) {
        match self.media.upload_all(message, targets).await {
            Ok(uploaded) if uploaded != message.media => {
                let mut updated = message.clone();
                updated.media = uploaded;
                if let Err(error) = self.store.update_message(&updated).await {
                    tracing::warn!(
                        "Failed to record uploaded media for {}: {}",
                        message.local_id,
                        error
                    );
                }
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!("Media upload for {} failed: {}", message.local_id, error);
            }
        }
    }

    async fn download_media(&self, message: &Message) {
        if message.media.is_empty() {
            return;
        }
        if let Err(error) = self.media.download(message, &message.media).await {
            tracing::warn!("Media download for {} failed: {}", message.local_id, error);
        }
    }

    // Realtime

    /// Apply one realtime notification to the local store.
    pub async fn apply_realtime_event(&self, event: &RealtimeEvent) -> Result<()> {
        match event {
            RealtimeEvent::Connected { .. } => {}
            RealtimeEvent::TabCreated(tab) | RealtimeEvent::TabUpdated(tab) => {
                if let TabApplied::Linked(server_id) = apply::upsert_tab(&self.store, tab).await? {
                    self.deferred.notify_tab_created(&server_id).await?;
                }
            }
            RealtimeEvent::TabDeleted { id } => {
                apply::delete_tab(&self.store, id).await?;
            }
            RealtimeEvent::MessageCreated(message) | RealtimeEvent::MessageUpdated(message) => {
                match apply::upsert_message(&self.store, message, UnresolvedParent::Defer).await? {
                    MessageApplied::Inserted(local) => self.download_media(&local).await,
                    MessageApplied::Unresolved => self.deferred.enqueue(message.clone()).await,
                    MessageApplied::Updated(_) | MessageApplied::Unchanged => {}
                }
            }
            RealtimeEvent::MessageDeleted { id } => {
                apply::delete_message(&self.store, id).await?;
            }
            RealtimeEvent::MessageMoved {
                id,
                tab_id,
                position,
            } => {
                let applied = apply::move_message(
                    &self.store,
                    id,
                    tab_id.as_deref(),
                    *position,
                    UnresolvedParent::Defer,
                )
                .await?;
                if applied == MessageApplied::Unresolved {
                    tracing::debug!("Move of unknown message {} needs a full sync", id);
                    self.run_incremental_sync().await?;
                }
            }
            RealtimeEvent::SyncRequired { reason } => {
                tracing::info!(
                    "Server requested a sync: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.run_incremental_sync().await?;
            }
        }
        Ok(())
    }

    /// Apply realtime events until cancelled or the channel closes.
    pub async fn pump_realtime(
        self: Arc<Self>,
        mut events: broadcast::Receiver<RealtimeEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Err(error) = self.apply_realtime_event(&event).await {
                        tracing::warn!("Failed to apply realtime event: {}", error);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} realtime event(s), falling back to sync", missed);
                    if let Err(error) = self.run_incremental_sync().await {
                        tracing::warn!("Catch-up sync failed: {}", error);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Realtime pump stopped");
    }

    /// Run incremental sync on a fixed interval until cancelled.
    pub async fn run_periodic(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.run_incremental_sync().await {
                        tracing::debug!("Periodic sync failed: {}", error);
                    }
                }
            }
        }
        tracing::debug!("Periodic sync stopped");
    }
}

fn initial_tab(tab: &Tab) -> InitialSyncTab {
    InitialSyncTab {
        local_id: tab.local_id,
        title: tab.title.clone(),
        position: tab.position,
        created_at: tab.created_at,
        updated_at: tab.updated_at,
    }
}

fn initial_message(message: &Message) -> InitialSyncMessage {
    InitialSyncMessage {
        local_id: message.local_id,
        tab_local_id: message.tab_local_id,
        text: message.text.clone(),
        entities: message.entities.clone(),
        media: message.media.clone(),
        position: message.position,
        created_at: message.created_at,
        updated_at: message.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InitialSyncStatus;
    use crate::editor::{LocalEditor, MessageDraft};
    use crate::media::NoopMediaPipeline;
    use crate::sync::ReconcileConfig;
    use crate::test_support::{remote_message, remote_tab, FakeRemote};
    use pretty_assertions::assert_eq;

    struct Harness {
        store: LocalStore,
        log: PendingOperationLog,
        editor: LocalEditor,
        remote: Arc<FakeRemote>,
        deferred: DeferredReconciliationQueue,
        orchestrator: SyncOrchestrator,
    }

    async fn harness_with(remote: FakeRemote) -> Harness {
        let store = LocalStore::open_in_memory().await.unwrap();
        let log = PendingOperationLog::spawn(store.clone());
        let remote = Arc::new(remote);
        let media: Arc<dyn MediaPipeline> = Arc::new(NoopMediaPipeline);
        let deferred = DeferredReconciliationQueue::new(
            store.clone(),
            media.clone(),
            ReconcileConfig {
                max_attempts: 10,
                retry_delay: Duration::from_secs(60),
            },
        );
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            log.clone(),
            remote.clone(),
            deferred.clone(),
            media,
            OrchestratorConfig {
                max_operation_retries: 2,
                sync_interval: Duration::from_secs(60),
            },
        );
        Harness {
            editor: LocalEditor::new(store.clone(), log.clone()),
            store,
            log,
            remote,
            deferred,
            orchestrator,
        }
    }

    async fn harness() -> Harness {
        harness_with(FakeRemote::new()).await
    }

    fn drained(outcome: SyncOutcome) -> DrainReport {
        match outcome {
            SyncOutcome::Completed(report) => report.drain,
            SyncOutcome::Skipped => panic!("sync was skipped"),
        }
    }

    fn server_error() -> ApiError {
        ApiError::Server {
            status: 502,
            message: "bad gateway".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_creates_tab_before_its_message() {
        let h = harness().await;
        let tab = h.editor.create_tab("Work").await.unwrap();
        let message = h
            .editor
            .create_message(MessageDraft::text(Some(tab.local_id), "ship it"))
            .await
            .unwrap();

        let report = drained(h.orchestrator.drain_queue().await.unwrap());

        assert_eq!(report.acknowledged, 2);
        let tab_server_id = h.store.tab_server_id(&tab.local_id).await.unwrap();
        assert_eq!(tab_server_id.as_deref(), Some("tab-1"));
        let creates = h.remote.state().message_creates.clone();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].tab_id.as_deref(), Some("tab-1"));
        let local = h.store.get_message(&message.local_id).await.unwrap().unwrap();
        assert_eq!(local.server_id.as_deref(), Some("msg-2"));
        assert_eq!(h.log.count().await.unwrap(), 0);
        assert_eq!(h.orchestrator.current_state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lost_create_response_does_not_duplicate_the_tab() {
        let h = harness().await;
        let tab = h.editor.create_tab("Once").await.unwrap();
        h.remote.fail_after_commit(server_error());

        let first = drained(h.orchestrator.drain_queue().await.unwrap());
        assert_eq!(first.retried, 1);
        let second = drained(h.orchestrator.drain_queue().await.unwrap());
        assert_eq!(second.acknowledged, 1);

        let state = h.remote.state();
        assert_eq!(state.tab_creates.len(), 2);
        assert_eq!(state.tabs.len(), 1);
        drop(state);
        let local = h.store.get_tab(&tab.local_id).await.unwrap().unwrap();
        assert_eq!(local.server_id.as_deref(), Some("tab-1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retryable_failure_is_dropped_after_max_retries() {
        let h = harness().await;
        h.editor.create_tab("Flaky").await.unwrap();
        for _ in 0..3 {
            h.remote.fail_next(server_error());
        }

        assert_eq!(drained(h.orchestrator.drain_queue().await.unwrap()).retried, 1);
        let pending = h.log.all().await.unwrap();
        assert_eq!(pending[0].retry_count, 1);
        assert!(pending[0].last_error.is_some());

        assert_eq!(drained(h.orchestrator.drain_queue().await.unwrap()).retried, 1);
        assert_eq!(drained(h.orchestrator.drain_queue().await.unwrap()).dropped, 1);
        assert_eq!(h.log.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_drain_keeps_retry_budget() {
        let h = harness().await;
        h.editor.create_tab("Later").await.unwrap();
        h.remote.fail_next(ApiError::Offline("connection refused".to_string()));

        let error = h.orchestrator.drain_queue().await.unwrap_err();

        assert!(error.is_connectivity());
        assert_eq!(h.orchestrator.current_state(), SyncState::Offline);
        let pending = h.log.all().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 0);
        assert!(!h.orchestrator.is_syncing());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_operation_is_dropped_immediately() {
        let h = harness().await;
        let tab = h.editor.create_tab("Bad").await.unwrap();
        h.remote.fail_next(ApiError::Validation {
            status: 422,
            message: "title too long".to_string(),
        });

        let report = drained(h.orchestrator.drain_queue().await.unwrap());

        assert_eq!(report.dropped, 1);
        assert_eq!(h.log.count().await.unwrap(), 0);
        let local = h.store.get_tab(&tab.local_id).await.unwrap().unwrap();
        assert_eq!(local.server_id, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_already_missing_remote_tab_succeeds() {
        let h = harness().await;
        let tab = h.editor.create_tab("Gone").await.unwrap();
        h.orchestrator.drain_queue().await.unwrap();
        h.remote.state().tabs.clear();

        h.editor.delete_tab(&tab.local_id).await.unwrap();
        let report = drained(h.orchestrator.drain_queue().await.unwrap());

        assert_eq!(report.acknowledged, 1);
        assert_eq!(h.store.get_tab(&tab.local_id).await.unwrap(), None);
        assert_eq!(h.remote.state().deletes, vec!["tab-1".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_waits_for_the_create_acknowledgement() {
        let h = harness().await;
        let tab = h.editor.create_tab("Draft").await.unwrap();
        h.editor.rename_tab(&tab.local_id, "Final").await.unwrap();
        h.remote.fail_next(server_error());

        let report = drained(h.orchestrator.drain_queue().await.unwrap());
        assert_eq!(report.retried, 2);

        let report = drained(h.orchestrator.drain_queue().await.unwrap());
        assert_eq!(report.acknowledged, 2);
        let updates = h.remote.state().tab_updates.clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "tab-1");
        assert_eq!(updates[0].1.title, "Final");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn message_in_tab_deleted_in_same_batch_lands_in_inbox() {
        let h = harness().await;
        h.remote.set_changes(ChangeSet {
            server_time: 5_000,
            tabs: crate::api::EntityChanges {
                created: vec![remote_tab("srv-t", "Doomed")],
                ..Default::default()
            },
            ..Default::default()
        });
        h.orchestrator.run_incremental_sync().await.unwrap();
        assert!(h.store.get_tab_by_server_id("srv-t").await.unwrap().is_some());

        h.remote.set_changes(ChangeSet {
            server_time: 9_000,
            tabs: crate::api::EntityChanges {
                deleted: vec!["srv-t".to_string()],
                ..Default::default()
            },
            messages: crate::api::EntityChanges {
                created: vec![remote_message("srv-m", Some("srv-t"), "orphan")],
                ..Default::default()
            },
        });
        let outcome = h.orchestrator.run_incremental_sync().await.unwrap();

        let SyncOutcome::Completed(report) = outcome else {
            panic!("sync was skipped");
        };
        assert_eq!(report.messages_applied, 1);
        assert_eq!(report.deletions_applied, 1);
        assert_eq!(h.store.get_tab_by_server_id("srv-t").await.unwrap(), None);
        let inbox = h.store.list_messages(None).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].text, "orphan");
        assert_eq!(h.store.watermark().await.unwrap(), Some(9_000));
        assert_eq!(h.remote.state().fetches, vec![None, Some(5_000)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_fetch_keeps_watermark() {
        let h = harness().await;
        h.store.mark_initial_sync_complete().await.unwrap();
        h.store.set_watermark(1_234).await.unwrap();
        h.remote.fail_next(ApiError::Offline("no route".to_string()));

        assert!(h.orchestrator.run_incremental_sync().await.is_err());

        assert_eq!(h.orchestrator.current_state(), SyncState::Offline);
        assert_eq!(h.store.watermark().await.unwrap(), Some(1_234));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_trigger_is_skipped() {
        let h = harness_with(FakeRemote::with_fetch_delay(Duration::from_millis(300))).await;
        h.store.mark_initial_sync_complete().await.unwrap();

        let (first, second) = tokio::join!(h.orchestrator.run_incremental_sync(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.orchestrator.run_incremental_sync().await
        });

        assert!(matches!(first.unwrap(), SyncOutcome::Completed(_)));
        assert_eq!(second.unwrap(), SyncOutcome::Skipped);
        assert_eq!(h.remote.state().fetches.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn initial_sync_maps_snapshot_and_skips_queued_creates() {
        let h = harness().await;
        h.remote
            .set_initial_status(Ok(InitialSyncStatus { completed: false }));
        let tab = h.editor.create_tab("Offline tab").await.unwrap();
        let message = h
            .editor
            .create_message(MessageDraft::text(Some(tab.local_id), "written offline"))
            .await
            .unwrap();

        let outcome = h.orchestrator.run_initial_sync().await.unwrap();

        let SyncOutcome::Completed(report) = outcome else {
            panic!("sync was skipped");
        };
        assert!(report.initial_upload);
        assert!(h.store.initial_sync_complete().await.unwrap());
        let requests = h.remote.state().initial_requests.clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].tab_local_id, Some(tab.local_id));
        let local = h.store.get_message(&message.local_id).await.unwrap().unwrap();
        assert_eq!(local.server_id.as_deref(), Some("msg-2"));

        let drain = drained(h.orchestrator.drain_queue().await.unwrap());
        assert_eq!(drain.acknowledged, 2);
        let state = h.remote.state();
        assert!(state.tab_creates.is_empty());
        assert!(state.message_creates.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_initial_sync_endpoint_counts_as_done() {
        let h = harness().await;
        h.remote
            .set_initial_status(Err(ApiError::NotFound("no such route".to_string())));

        let outcome = h.orchestrator.run_initial_sync().await.unwrap();

        assert_eq!(outcome, SyncOutcome::Completed(SyncReport::default()));
        assert!(h.store.initial_sync_complete().await.unwrap());
        assert!(h.remote.state().initial_requests.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn realtime_message_waits_for_its_tab() {
        let h = harness().await;

        h.orchestrator
            .apply_realtime_event(&RealtimeEvent::MessageCreated(remote_message(
                "srv-m",
                Some("srv-t"),
                "early",
            )))
            .await
            .unwrap();
        assert_eq!(h.deferred.len().await, 1);
        assert!(h.store.list_all_messages().await.unwrap().is_empty());

        h.orchestrator
            .apply_realtime_event(&RealtimeEvent::TabCreated(remote_tab("srv-t", "Late")))
            .await
            .unwrap();

        assert!(h.deferred.is_empty().await);
        let parent = h.store.tab_local_id("srv-t").await.unwrap();
        let messages = h.store.list_messages(parent.as_ref()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "early");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn realtime_delete_removes_local_message() {
        let h = harness().await;
        apply::upsert_message(
            &h.store,
            &remote_message("srv-m", None, "bye"),
            UnresolvedParent::Inbox,
        )
        .await
        .unwrap();

        h.orchestrator
            .apply_realtime_event(&RealtimeEvent::MessageDeleted {
                id: "srv-m".to_string(),
            })
            .await
            .unwrap();

        assert!(h.store.list_all_messages().await.unwrap().is_empty());
    }
}
