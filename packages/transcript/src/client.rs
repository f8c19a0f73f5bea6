//! HTTP client for the session server.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use session_protocol::{
    AccountCreated, AccountId, AllocateRequest, AllocateResponse, CreateSessionRequest,
    DiscardCommittedRequest, ErrorBody, EventsPage, LocalId, MetadataWriteResult, ScopeKey,
    SessionCreated, SessionId, SessionMetadata, SubmitEventRequest, SubmitReceipt,
    UpdateMetadataRequest,
};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// What a session needs from the server: submitting writes and paging the log.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, session_id: SessionId, request: &SubmitEventRequest)
        -> Result<SubmitReceipt>;

    async fn events_after(
        &self,
        session_id: SessionId,
        after_seq: i64,
        limit: Option<i64>,
    ) -> Result<EventsPage>;
}

#[derive(Clone)]
pub struct HttpClient {
    http_client: Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from environment variable `SESSION_SERVER_URL`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("SESSION_SERVER_URL")
            .map_err(|_| ClientError::Network("SESSION_SERVER_URL not set".into()))?;
        Ok(Self::new(url))
    }

    /// Use an existing reqwest client (shared pools, custom timeouts).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create_account(&self) -> Result<AccountId> {
        let created: AccountCreated = self
            .send(self.http_client.post(format!("{}/v1/accounts", self.base_url)))
            .await?;
        Ok(created.id)
    }

    pub async fn create_session(
        &self,
        account_id: AccountId,
        metadata: Value,
    ) -> Result<SessionCreated> {
        self.send(
            self.http_client
                .post(format!("{}/v1/accounts/{}/sessions", self.base_url, account_id))
                .json(&CreateSessionRequest { metadata }),
        )
        .await
    }

    /// Allocates one number (`count` of `None`) or a contiguous range.
    pub async fn allocate(&self, scope: ScopeKey, count: Option<i64>) -> Result<AllocateResponse> {
        self.send(
            self.http_client
                .post(format!(
                    "{}/v1/scopes/{}/{}/sequences",
                    self.base_url,
                    scope.kind().as_str(),
                    scope.uuid()
                ))
                .json(&AllocateRequest { count }),
        )
        .await
    }

    pub async fn get_metadata(&self, session_id: SessionId) -> Result<SessionMetadata> {
        self.send(
            self.http_client
                .get(format!("{}/v1/sessions/{}/metadata", self.base_url, session_id)),
        )
        .await
    }

    pub async fn update_metadata(
        &self,
        session_id: SessionId,
        expected_version: i64,
        metadata: Value,
    ) -> Result<MetadataWriteResult> {
        self.send(
            self.http_client
                .post(format!("{}/v1/sessions/{}/metadata", self.base_url, session_id))
                .json(&UpdateMetadataRequest {
                    expected_version,
                    metadata,
                }),
        )
        .await
    }

    pub async fn discard_committed(
        &self,
        session_id: SessionId,
        expected_version: i64,
        local_ids: Vec<LocalId>,
    ) -> Result<MetadataWriteResult> {
        self.send(
            self.http_client
                .post(format!(
                    "{}/v1/sessions/{}/metadata/discarded",
                    self.base_url, session_id
                ))
                .json(&DiscardCommittedRequest {
                    expected_version,
                    local_ids,
                }),
        )
        .await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "session server request failed");
            ClientError::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (message, retryable) = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => (body.message, body.retryable),
                Err(_) => (text, status.as_u16() == 503),
            };
            warn!(status = %status, error = %message, "session server error");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
                retryable,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Parse(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn submit(
        &self,
        session_id: SessionId,
        request: &SubmitEventRequest,
    ) -> Result<SubmitReceipt> {
        debug!(session_id = %session_id, real_id = ?request.real_id, "submitting event");
        self.send(
            self.http_client
                .post(format!("{}/v1/sessions/{}/events", self.base_url, session_id))
                .json(request),
        )
        .await
    }

    async fn events_after(
        &self,
        session_id: SessionId,
        after_seq: i64,
        limit: Option<i64>,
    ) -> Result<EventsPage> {
        let mut query = vec![("after_seq", after_seq.to_string())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.send(
            self.http_client
                .get(format!("{}/v1/sessions/{}/events", self.base_url, session_id))
                .query(&query),
        )
        .await
    }
}
