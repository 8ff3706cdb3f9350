//! Buffer for realtime message events whose parent tab is not yet known.
//!
//! Realtime delivery is not ordered relative to incremental sync, so a
//! `message_created` can arrive before the tab it belongs to. Such events wait
//! here and are retried whenever a tab gains a server identifier, and on a
//! fixed delay while anything remains buffered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::apply::{self, MessageApplied, UnresolvedParent};
use crate::api::RemoteMessage;
use crate::error::Result;
use crate::media::MediaPipeline;
use crate::services::LocalStore;

const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Failed passes after which an event is dropped
    pub max_attempts: u32,
    /// Delay before re-running a pass that left events buffered
    pub retry_delay: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    /// Events whose message was already present locally
    pub deduplicated: usize,
    pub retained: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
struct DeferredEvent {
    message: RemoteMessage,
    attempts: u32,
}

#[derive(Default)]
struct QueueState {
    events: Vec<DeferredEvent>,
    retry_scheduled: bool,
}

struct Inner {
    store: LocalStore,
    media: Arc<dyn MediaPipeline>,
    config: ReconcileConfig,
    state: Mutex<QueueState>,
    // Held for the duration of a pass so passes never interleave
    pass: Mutex<()>,
}

/// Cloneable handle to the deferred reconciliation queue.
#[derive(Clone)]
pub struct DeferredReconciliationQueue {
    inner: Arc<Inner>,
}

impl DeferredReconciliationQueue {
    pub fn new(store: LocalStore, media: Arc<dyn MediaPipeline>, config: ReconcileConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                media,
                config,
                state: Mutex::new(QueueState::default()),
                pass: Mutex::new(()),
            }),
        }
    }

    /// Buffer a message event. A buffered event for the same server id is replaced.
    pub async fn enqueue(&self, message: RemoteMessage) {
        {
            let mut state = self.inner.state.lock().await;
            tracing::debug!(
                "Deferring message {} until tab {} is known",
                message.id,
                message.tab_id.as_deref().unwrap_or_default()
            );
            merge_event(
                &mut state.events,
                DeferredEvent {
                    message,
                    attempts: 0,
                },
            );
        }
        self.schedule_retry().await;
    }

    /// A tab gained a server identifier; retry buffered events now.
    pub async fn notify_tab_created(&self, server_id: &str) -> Result<ReconcileReport> {
        if self.is_empty().await {
            return Ok(ReconcileReport::default());
        }
        tracing::debug!("Tab {} resolved, reprocessing deferred messages", server_id);
        self.process_pending().await
    }

    /// Run one pass over every buffered event, scheduling another while any remain.
    pub async fn process_pending(&self) -> Result<ReconcileReport> {
        let (report, remaining) = self.run_pass().await;
        if remaining > 0 {
            self.schedule_retry().await;
        }
        Ok(report)
    }

    /// One pass; returns the report and how many events are still buffered.
    async fn run_pass(&self) -> (ReconcileReport, usize) {
        let pass_guard = self.inner.pass.lock().await;
        let events = std::mem::take(&mut self.inner.state.lock().await.events);
        let mut report = ReconcileReport::default();
        let mut retained = Vec::new();

        for mut event in events {
            let outcome = match self.already_applied(&event.message).await {
                Ok(true) => {
                    report.deduplicated += 1;
                    continue;
                }
                Ok(false) => {
                    apply::upsert_message(
                        &self.inner.store,
                        &event.message,
                        UnresolvedParent::Defer,
                    )
                    .await
                }
                Err(error) => Err(error),
            };

            match outcome {
                Ok(MessageApplied::Inserted(message) | MessageApplied::Updated(message)) => {
                    report.applied += 1;
                    if !message.media.is_empty() {
                        if let Err(error) = self.inner.media.download(&message, &message.media).await
                        {
                            tracing::warn!(
                                "Media download for message {} failed: {}",
                                event.message.id,
                                error
                            );
                        }
                    }
                }
                Ok(MessageApplied::Unchanged) => report.deduplicated += 1,
                Ok(MessageApplied::Unresolved) => {
                    event.attempts += 1;
                    if event.attempts >= self.inner.config.max_attempts {
                        tracing::warn!(
                            "Dropping message {} after {} attempts: tab {} never appeared",
                            event.message.id,
                            event.attempts,
                            event.message.tab_id.as_deref().unwrap_or_default()
                        );
                        report.dropped += 1;
                    } else {
                        retained.push(event);
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        "Failed to apply deferred message {}: {}",
                        event.message.id,
                        error
                    );
                    event.attempts += 1;
                    if event.attempts >= self.inner.config.max_attempts {
                        tracing::warn!(
                            "Dropping message {} after {} failed attempts",
                            event.message.id,
                            event.attempts
                        );
                        report.dropped += 1;
                    } else {
                        retained.push(event);
                    }
                }
            }
        }

        report.retained = retained.len();
        let remaining = {
            let mut state = self.inner.state.lock().await;
            // Events enqueued during the pass are newer than the retained copies
            let arrived = std::mem::take(&mut state.events);
            state.events = retained;
            for event in arrived {
                merge_event(&mut state.events, event);
            }
            state.events.len()
        };
        drop(pass_guard);

        if report.applied + report.dropped > 0 {
            tracing::info!(
                "Deferred reconciliation: {} applied, {} dropped, {} waiting",
                report.applied,
                report.dropped,
                remaining
            );
        }
        (report, remaining)
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Forget every buffered event.
    pub async fn clear(&self) {
        self.inner.state.lock().await.events.clear();
    }

    /// Whether local state already holds this event or something newer.
    async fn already_applied(&self, message: &RemoteMessage) -> Result<bool> {
        let store = &self.inner.store;
        let local = match store.get_message_by_server_id(&message.id).await? {
            Some(local) => Some(local),
            None => match message.local_id {
                Some(local_id) => store.get_message(&local_id).await?,
                None => None,
            },
        };
        Ok(local.is_some_and(|local| local.is_deleted || local.updated_at >= message.updated_at))
    }

    /// Start the delayed retry loop unless one is already running.
    async fn schedule_retry(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.retry_scheduled || state.events.is_empty() {
                return;
            }
            state.retry_scheduled = true;
        }
        tokio::spawn(self.clone().retry_loop());
    }

    async fn retry_loop(self) {
        loop {
            tokio::time::sleep(self.inner.config.retry_delay).await;
            let (_, remaining) = self.run_pass().await;
            if remaining > 0 {
                continue;
            }
            let mut state = self.inner.state.lock().await;
            if state.events.is_empty() {
                state.retry_scheduled = false;
                return;
            }
        }
    }
}

fn merge_event(events: &mut Vec<DeferredEvent>, event: DeferredEvent) {
    match events
        .iter_mut()
        .find(|existing| existing.message.id == event.message.id)
    {
        Some(existing) => existing.message = event.message,
        None => events.push(event),
    }
}
