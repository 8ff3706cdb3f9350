//! Shared fixtures for crate tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{
    ApiError, ApiResult, ChangeSet, CreateMessageRequest, CreateTabRequest, IdMapping,
    InitialSyncRequest, InitialSyncResponse, InitialSyncStatus, RemoteApi, RemoteMessage,
    RemoteTab, UpdateMessageRequest, UpdateTabRequest,
};

pub fn remote_tab(id: &str, title: &str) -> RemoteTab {
    RemoteTab {
        id: id.to_string(),
        local_id: None,
        title: title.to_string(),
        position: 0,
        created_at: 1_000,
        updated_at: 1_000,
    }
}

pub fn remote_message(id: &str, tab_id: Option<&str>, text: &str) -> RemoteMessage {
    RemoteMessage {
        id: id.to_string(),
        local_id: None,
        tab_id: tab_id.map(ToString::to_string),
        text: text.to_string(),
        entities: serde_json::Value::Null,
        media: Vec::new(),
        position: 0,
        created_at: 1_000,
        updated_at: 1_000,
    }
}

/// Failure injected into the next remote call
#[derive(Debug, Clone)]
pub enum Injected {
    /// Fail before the server does anything
    Before(ApiError),
    /// Apply the call server side, then lose the response
    After(ApiError),
}

#[derive(Default)]
pub struct FakeState {
    pub tabs: HashMap<String, RemoteTab>,
    pub messages: HashMap<String, RemoteMessage>,
    pub next_id: usize,
    pub failures: VecDeque<Injected>,
    pub pending_changes: ChangeSet,
    pub initial_status: Option<ApiResult<InitialSyncStatus>>,
    pub tab_creates: Vec<CreateTabRequest>,
    pub message_creates: Vec<CreateMessageRequest>,
    pub tab_updates: Vec<(String, UpdateTabRequest)>,
    pub message_updates: Vec<(String, UpdateMessageRequest)>,
    pub deletes: Vec<String>,
    pub fetches: Vec<Option<i64>>,
    pub initial_requests: Vec<InitialSyncRequest>,
}

/// In-memory backend honoring `local_id` idempotency.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
    fetch_delay: Option<Duration>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::default(),
            fetch_delay: Some(delay),
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_next(&self, error: ApiError) {
        self.state().failures.push_back(Injected::Before(error));
    }

    pub fn fail_after_commit(&self, error: ApiError) {
        self.state().failures.push_back(Injected::After(error));
    }

    pub fn set_changes(&self, changes: ChangeSet) {
        self.state().pending_changes = changes;
    }

    pub fn set_initial_status(&self, status: ApiResult<InitialSyncStatus>) {
        self.state().initial_status = Some(status);
    }

    pub fn insert_tab(&self, tab: RemoteTab) {
        self.state().tabs.insert(tab.id.clone(), tab);
    }

    fn before(&self) -> ApiResult<Option<ApiError>> {
        match self.state().failures.pop_front() {
            Some(Injected::Before(error)) => Err(error),
            Some(Injected::After(error)) => Ok(Some(error)),
            None => Ok(None),
        }
    }

    fn after<T>(lost: Option<ApiError>, value: T) -> ApiResult<T> {
        match lost {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }

    fn next_id(state: &mut FakeState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn create_tab(&self, request: &CreateTabRequest) -> ApiResult<RemoteTab> {
        let lost = self.before()?;
        let tab = {
            let mut state = self.state();
            state.tab_creates.push(request.clone());
            let existing = state
                .tabs
                .values()
                .find(|tab| tab.local_id == Some(request.local_id))
                .cloned();
            if let Some(tab) = existing {
                tab
            } else {
                let tab = RemoteTab {
                    id: Self::next_id(&mut state, "tab"),
                    local_id: Some(request.local_id),
                    title: request.title.clone(),
                    position: request.position,
                    created_at: request.created_at,
                    updated_at: request.created_at,
                };
                state.tabs.insert(tab.id.clone(), tab.clone());
                tab
            }
        };
        Self::after(lost, tab)
    }

    async fn update_tab(
        &self,
        server_id: &str,
        request: &UpdateTabRequest,
    ) -> ApiResult<RemoteTab> {
        let lost = self.before()?;
        let mut state = self.state();
        state
            .tab_updates
            .push((server_id.to_string(), request.clone()));
        let Some(tab) = state.tabs.get_mut(server_id) else {
            return Err(ApiError::NotFound(format!("tab {server_id}")));
        };
        tab.title.clone_from(&request.title);
        tab.position = request.position;
        tab.updated_at = request.updated_at;
        let tab = tab.clone();
        drop(state);
        Self::after(lost, tab)
    }

    async fn delete_tab(&self, server_id: &str) -> ApiResult<()> {
        let lost = self.before()?;
        let mut state = self.state();
        state.deletes.push(server_id.to_string());
        if state.tabs.remove(server_id).is_none() {
            return Err(ApiError::NotFound(format!("tab {server_id}")));
        }
        drop(state);
        Self::after(lost, ())
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> ApiResult<RemoteMessage> {
        let lost = self.before()?;
        let message = {
            let mut state = self.state();
            state.message_creates.push(request.clone());
            let existing = state
                .messages
                .values()
                .find(|message| message.local_id == Some(request.local_id))
                .cloned();
            if let Some(message) = existing {
                message
            } else {
                let message = RemoteMessage {
                    id: Self::next_id(&mut state, "msg"),
                    local_id: Some(request.local_id),
                    tab_id: request.tab_id.clone(),
                    text: request.text.clone(),
                    entities: request.entities.clone(),
                    media: request.media.clone(),
                    position: request.position,
                    created_at: request.created_at,
                    updated_at: request.created_at,
                };
                state.messages.insert(message.id.clone(), message.clone());
                message
            }
        };
        Self::after(lost, message)
    }

    async fn update_message(
        &self,
        server_id: &str,
        request: &UpdateMessageRequest,
    ) -> ApiResult<RemoteMessage> {
        let lost = self.before()?;
        let mut state = self.state();
        state
            .message_updates
            .push((server_id.to_string(), request.clone()));
        let Some(message) = state.messages.get_mut(server_id) else {
            return Err(ApiError::NotFound(format!("message {server_id}")));
        };
        message.tab_id.clone_from(&request.tab_id);
        message.text.clone_from(&request.text);
        message.position = request.position;
        message.updated_at = request.updated_at;
        let message = message.clone();
        drop(state);
        Self::after(lost, message)
    }

    async fn delete_message(&self, server_id: &str) -> ApiResult<()> {
        let lost = self.before()?;
        let mut state = self.state();
        state.deletes.push(server_id.to_string());
        if state.messages.remove(server_id).is_none() {
            return Err(ApiError::NotFound(format!("message {server_id}")));
        }
        drop(state);
        Self::after(lost, ())
    }

    async fn initial_sync_status(&self) -> ApiResult<InitialSyncStatus> {
        self.before()?;
        self.state()
            .initial_status
            .clone()
            .unwrap_or(Ok(InitialSyncStatus { completed: true }))
    }

    async fn initial_sync(&self, request: &InitialSyncRequest) -> ApiResult<InitialSyncResponse> {
        let lost = self.before()?;
        let response = {
            let mut state = self.state();
            state.initial_requests.push(request.clone());
            let mut response = InitialSyncResponse::default();
            for tab in &request.tabs {
                let server_id = Self::next_id(&mut state, "tab");
                response.tabs.push(IdMapping {
                    local_id: tab.local_id,
                    server_id,
                });
            }
            for message in &request.messages {
                let server_id = Self::next_id(&mut state, "msg");
                response.messages.push(IdMapping {
                    local_id: message.local_id,
                    server_id,
                });
            }
            response
        };
        Self::after(lost, response)
    }

    async fn fetch_changes(&self, since: Option<i64>) -> ApiResult<ChangeSet> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.before()?;
        let mut state = self.state();
        state.fetches.push(since);
        let server_time = since.unwrap_or_default() + 1_000;
        let mut changes = std::mem::take(&mut state.pending_changes);
        changes.server_time = changes.server_time.max(server_time);
        Ok(changes)
    }
}
