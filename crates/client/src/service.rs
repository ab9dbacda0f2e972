use std::time::Duration;

use parley_stream::{
    DispatchReport, StreamConsumer, StreamHandler, StreamSession, StreamTarget, spawn_session,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use snafu::ResultExt;
use tokio::sync::oneshot;

use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult, HttpSnafu, StatusSnafu};
use crate::graphql::{
    CREATE_SESSION_MUTATION, CreateSessionData, GET_SESSION_QUERY, GetSessionData,
    GraphQlRequest, GraphQlResponse, HELLO_QUERY, HelloData, SEND_MESSAGE_MUTATION,
    SendMessageData,
};
use crate::types::{ChatResponse, ChatSession};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the chat service: GraphQL calls plus the streaming reply endpoint.
///
/// Remembers the active conversation so consecutive messages land in the
/// same session.
#[derive(Debug, Clone)]
pub struct ChatService {
    http: reqwest::Client,
    settings: ClientSettings,
    session_id: Option<String>,
}

impl ChatService {
    pub fn new(settings: ClientSettings) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context(HttpSnafu {
                stage: "build-http-client",
            })?;

        Ok(Self {
            http,
            settings: settings.normalized(),
            session_id: None,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Forgets the active conversation; the next message starts a new one.
    pub fn reset_session(&mut self) {
        self.session_id = None;
    }

    pub async fn test_connection(&self) -> ClientResult<String> {
        let data: HelloData = self
            .send_graphql("test-connection", HELLO_QUERY, None)
            .await?;
        Ok(data.hello)
    }

    pub async fn create_session(&mut self) -> ClientResult<ChatSession> {
        let data: CreateSessionData = self
            .send_graphql("create-session", CREATE_SESSION_MUTATION, None)
            .await?;
        let session = data.create_chat_session;
        tracing::info!(session_id = %session.id, "chat session created");
        self.session_id = Some(session.id.clone());
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> ClientResult<Option<ChatSession>> {
        let data: GetSessionData = self
            .send_graphql("get-session", GET_SESSION_QUERY, Some(json!({ "id": id })))
            .await?;
        Ok(data.get_chat_session)
    }

    /// Sends one user message, creating a conversation first when none is active.
    pub async fn send_message(&mut self, message: &str) -> ClientResult<ChatResponse> {
        let session_id = self.ensure_session().await?;
        let data: SendMessageData = self
            .send_graphql(
                "send-message",
                SEND_MESSAGE_MUTATION,
                Some(json!({ "message": message, "sessionId": session_id })),
            )
            .await?;

        let response = data.send_message;
        if let Some(session) = &response.session {
            self.session_id = Some(session.id.clone());
        }
        if !response.success {
            tracing::warn!(
                session_id = %session_id,
                error = ?response.error,
                "service rejected message"
            );
        }
        Ok(response)
    }

    /// Posts `message` to the streaming endpoint and feeds the reply into `handler`.
    ///
    /// Transport failures and cancellation are reported through the returned
    /// [`DispatchReport`]; only failures before the first byte are errors.
    pub async fn stream_message<H>(
        &mut self,
        message: &str,
        handler: H,
        cancel_rx: oneshot::Receiver<()>,
    ) -> ClientResult<DispatchReport>
    where
        H: StreamHandler,
    {
        let response = self.open_stream("stream-message", message).await?;
        let report = StreamConsumer::new(handler)
            .run_until_cancelled(response.bytes_stream(), cancel_rx)
            .await;

        tracing::debug!(
            outcome = ?report.outcome,
            chunks = report.chunks,
            messages = report.dispatched.total(),
            malformed = report.malformed,
            "reply stream closed"
        );
        Ok(report)
    }

    /// Same as [`Self::stream_message`] but delivers the reply as channel events.
    pub async fn open_reply_session(
        &mut self,
        target: StreamTarget,
        message: &str,
    ) -> ClientResult<StreamSession> {
        let response = self.open_stream("open-reply-session", message).await?;
        Ok(spawn_session(target, response.bytes_stream()))
    }

    async fn ensure_session(&mut self) -> ClientResult<String> {
        if let Some(id) = &self.session_id {
            return Ok(id.clone());
        }
        Ok(self.create_session().await?.id)
    }

    async fn open_stream(
        &mut self,
        stage: &'static str,
        message: &str,
    ) -> ClientResult<reqwest::Response> {
        let session_id = self.ensure_session().await?;
        let url = self.settings.stream_url();
        if self.settings.network_logs {
            tracing::debug!(url = %url, session_id = %session_id, "opening reply stream");
        }

        let response = self
            .http
            .post(&url)
            .json(&json!({ "message": message, "sessionId": session_id }))
            .send()
            .await
            .map_err(|error| self.request_error(stage, error))?;
        check_status(stage, response).await
    }

    async fn send_graphql<T>(
        &self,
        stage: &'static str,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> ClientResult<T>
    where
        T: DeserializeOwned,
    {
        let request = GraphQlRequest { query, variables };
        if self.settings.network_logs {
            tracing::debug!(
                stage,
                endpoint = %self.settings.graphql_endpoint,
                request = ?request,
                "graphql request"
            );
        }

        let response = self
            .http
            .post(&self.settings.graphql_endpoint)
            .timeout(self.settings.timeout())
            .json(&request)
            .send()
            .await
            .map_err(|error| self.request_error(stage, error))?;
        let response = check_status(stage, response).await?;

        let envelope: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|error| self.request_error(stage, error))?;
        if self.settings.network_logs {
            tracing::debug!(stage, errors = ?envelope.errors, "graphql response");
        }
        envelope.into_data(stage)
    }

    fn request_error(&self, stage: &'static str, source: reqwest::Error) -> ClientError {
        tracing::warn!(stage, error = %source, "chat service request failed");
        if source.is_timeout() {
            return ClientError::Timeout {
                stage,
                timeout_ms: self.settings.timeout_ms,
            };
        }
        ClientError::Http { stage, source }
    }
}

async fn check_status(
    stage: &'static str,
    response: reqwest::Response,
) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = status_body(stage, response.text().await);
    tracing::warn!(stage, status = status.as_u16(), "chat service returned an error status");
    StatusSnafu {
        stage,
        status: status.as_u16(),
        body,
    }
    .fail()
}

/// Body of an error response; an unreadable body is logged and left empty.
fn status_body(stage: &'static str, body: reqwest::Result<String>) -> String {
    match body {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(stage, error = %error, "failed to read error status body");
            String::new()
        }
    }
}
