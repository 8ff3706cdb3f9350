//! Typed client for the `/v1` REST API.

use async_trait::async_trait;

use super::{
    ApiRequest, ApiResult, AuthenticatedTransport, ChangeSet, CreateMessageRequest,
    CreateTabRequest, InitialSyncRequest, InitialSyncResponse, InitialSyncStatus, RemoteApi,
    RemoteMessage, RemoteTab, UpdateMessageRequest, UpdateTabRequest,
};

/// `RemoteApi` implementation over the authenticated transport
#[derive(Clone)]
pub struct ApiClient {
    transport: AuthenticatedTransport,
}

impl ApiClient {
    pub const fn new(transport: AuthenticatedTransport) -> Self {
        Self { transport }
    }

    pub const fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }
}

fn resource_path(collection: &str, id: &str) -> String {
    format!("{collection}/{}", urlencoding::encode(id))
}

#[async_trait]
impl RemoteApi for ApiClient {
    async fn create_tab(&self, request: &CreateTabRequest) -> ApiResult<RemoteTab> {
        let request = ApiRequest::post("tabs").json(request)?;
        self.transport.execute_json(&request).await
    }

    async fn update_tab(
        &self,
        server_id: &str,
        request: &UpdateTabRequest,
    ) -> ApiResult<RemoteTab> {
        let request = ApiRequest::patch(resource_path("tabs", server_id)).json(request)?;
        self.transport.execute_json(&request).await
    }

    async fn delete_tab(&self, server_id: &str) -> ApiResult<()> {
        let request = ApiRequest::delete(resource_path("tabs", server_id));
        self.transport.execute_empty(&request).await
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> ApiResult<RemoteMessage> {
        let request = ApiRequest::post("messages").json(request)?;
        self.transport.execute_json(&request).await
    }

    async fn update_message(
        &self,
        server_id: &str,
        request: &UpdateMessageRequest,
    ) -> ApiResult<RemoteMessage> {
        let request = ApiRequest::patch(resource_path("messages", server_id)).json(request)?;
        self.transport.execute_json(&request).await
    }

    async fn delete_message(&self, server_id: &str) -> ApiResult<()> {
        let request = ApiRequest::delete(resource_path("messages", server_id));
        self.transport.execute_empty(&request).await
    }

    async fn initial_sync_status(&self) -> ApiResult<InitialSyncStatus> {
        self.transport
            .execute_json(&ApiRequest::get("sync/status"))
            .await
    }

    async fn initial_sync(&self, request: &InitialSyncRequest) -> ApiResult<InitialSyncResponse> {
        let request = ApiRequest::post("sync/initial")
            .long_running()
            .json(request)?;
        self.transport.execute_json(&request).await
    }

    async fn fetch_changes(&self, since: Option<i64>) -> ApiResult<ChangeSet> {
        let mut request = ApiRequest::get("sync/changes");
        if let Some(since) = since {
            request = request.query("since", since.to_string());
        }
        self.transport.execute_json(&request).await
    }
}
