use anyhow::Context;
use parley_types::api::{MessagesQuery, SendMessageRequest};
use parley_types::{ConversationHandle, ConversationView, Identity, Message, MessageId};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::backend::Backend;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Ledger gateway base URL, e.g. `https://ledger.example/api`.
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub auth_token: Option<String>,
}

impl HttpBackendConfig {
    /// Reads `PARLEY_BACKEND_URL` (required) and `PARLEY_AUTH_TOKEN`.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let base_url = std::env::var("PARLEY_BACKEND_URL").context("PARLEY_BACKEND_URL is not set")?;
        let auth_token = std::env::var("PARLEY_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        Ok(Self {
            base_url,
            auth_token,
        })
    }
}

/// Ledger access over its REST gateway.
///
/// - `GET  /conversations/{handle}`
/// - `GET  /conversations/{handle}/messages?after={id}`
/// - `POST /messages`
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: HttpBackendConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_conversation_resource<T: DeserializeOwned>(
        &self,
        handle: ConversationHandle,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = self.authorized(request).send().await.map_err(transport_error)?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                Err(ClientError::NotFoundOrUnauthorized(handle))
            }
            status if status.is_success() => decode(response).await,
            status => Err(status_error(status)),
        }
    }
}

impl Backend for HttpBackend {
    async fn fetch_conversation(&self, handle: ConversationHandle) -> Result<ConversationView> {
        let request = self.client.get(self.url(&format!("/conversations/{handle}")));
        self.get_conversation_resource(handle, request).await
    }

    async fn fetch_messages_since(
        &self,
        handle: ConversationHandle,
        after: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        let request = self
            .client
            .get(self.url(&format!("/conversations/{handle}/messages")))
            .query(&MessagesQuery { after });
        let messages: Vec<Message> = self.get_conversation_resource(handle, request).await?;
        trace!(%handle, count = messages.len(), "fetched messages over http");
        Ok(messages)
    }

    async fn send_message(&self, recipient: &Identity, content: &str) -> Result<()> {
        let body = SendMessageRequest {
            recipient: recipient.clone(),
            content: content.to_string(),
        };
        let response = self
            .authorized(self.client.post(self.url("/messages")).json(&body))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(status))
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Protocol(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> ClientError {
    ClientError::Unavailable(e.to_string())
}

fn status_error(status: StatusCode) -> ClientError {
    if status.is_server_error() {
        ClientError::Unavailable(format!("ledger returned {status}"))
    } else {
        ClientError::Protocol(format!("unexpected status {status}"))
    }
}
