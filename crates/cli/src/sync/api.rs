// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response chat API.
//!
//! Always available, higher latency and no push. The engine uses it when
//! the duplex channel is not connected, and for everything that is not a
//! message send (listing, history, creation, deletion).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use parley_core::message::{deserialize_id, deserialize_timestamp, WireMessage};

use crate::config::ApiConfig;
use crate::credential::CredentialProvider;

/// Typed failure of a request/response call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Maps an HTTP error status, keeping the server's detail for
    /// statuses without a dedicated variant.
    pub fn from_status(status: u16, detail: Option<String>) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden,
            404 => ApiError::NotFound,
            _ => ApiError::Status {
                status,
                detail: detail.unwrap_or_default(),
            },
        }
    }

    /// True when the remote side no longer accepts the conversation.
    pub fn is_conversation_rejected(&self) -> bool {
        matches!(self, ApiError::Forbidden | ApiError::NotFound)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Boxed future returned by [`ChatApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = ApiResult<T>> + Send + 'a>>;

/// A newly created conversation and its initial messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartedConversation {
    #[serde(rename = "chat_id", deserialize_with = "deserialize_id")]
    pub conversation_id: String,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

/// Result of sending to an existing conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SentReply {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_msg_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub bot_msg_id: String,
    #[serde(default)]
    pub reply: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationSummary {
    #[serde(rename = "chat_id", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ConversationList {
    #[serde(default)]
    chats: Vec<ConversationSummary>,
}

#[derive(Deserialize)]
struct ConversationHistory {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

/// Request/response operations of the chat service.
pub trait ChatApi: Send + Sync {
    fn list_conversations(&self) -> ApiFuture<'_, Vec<ConversationSummary>>;

    /// Creates an empty conversation.
    fn start_conversation(&self) -> ApiFuture<'_, StartedConversation>;

    /// Creates a conversation whose first message is `content`.
    fn create_conversation_with_message(
        &self,
        content: &str,
    ) -> ApiFuture<'_, StartedConversation>;

    fn send_to_conversation(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> ApiFuture<'_, SentReply>;

    /// Returns the full history of a conversation.
    fn get_conversation(&self, conversation_id: &str) -> ApiFuture<'_, Vec<WireMessage>>;

    /// Deletes every conversation of the signed-in user.
    fn delete_conversations(&self) -> ApiFuture<'_, ()>;
}

/// HTTP implementation using reqwest.
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    credential: Arc<dyn CredentialProvider>,
}

impl HttpChatApi {
    pub fn new(config: &ApiConfig, credential: Arc<dyn CredentialProvider>) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(HttpChatApi {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credential.credential() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %body, "chat api error response");
            return Err(ApiError::from_status(status.as_u16(), extract_detail(&body)));
        }
        Ok(response)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Pulls a human-readable message out of an error body.
///
/// Prefers a JSON `detail` field; falls back to the raw body.
pub fn extract_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(trimmed.to_string()),
        },
        Err(_) => Some(trimmed.to_string()),
    }
}

impl ChatApi for HttpChatApi {
    fn list_conversations(&self) -> ApiFuture<'_, Vec<ConversationSummary>> {
        Box::pin(async move {
            let list: ConversationList =
                self.execute(self.client.get(self.url("/chat/list"))).await?;
            Ok(list.chats)
        })
    }

    fn start_conversation(&self) -> ApiFuture<'_, StartedConversation> {
        Box::pin(async move { self.execute(self.client.post(self.url("/chat/start"))).await })
    }

    fn create_conversation_with_message(
        &self,
        content: &str,
    ) -> ApiFuture<'_, StartedConversation> {
        let body = json!({ "content": content });
        Box::pin(async move {
            self.execute(
                self.client
                    .post(self.url("/chat/start-with-message"))
                    .json(&body),
            )
            .await
        })
    }

    fn send_to_conversation(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> ApiFuture<'_, SentReply> {
        let body = json!({ "chat_id": conversation_id, "content": content });
        Box::pin(async move {
            self.execute(self.client.post(self.url("/chat/send")).json(&body))
                .await
        })
    }

    fn get_conversation(&self, conversation_id: &str) -> ApiFuture<'_, Vec<WireMessage>> {
        let path = format!("/chat/{}", conversation_id);
        Box::pin(async move {
            let history: ConversationHistory =
                self.execute(self.client.get(self.url(&path))).await?;
            Ok(history.messages)
        })
    }

    fn delete_conversations(&self) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.send(self.client.delete(self.url("/chat/clear"))).await?;
            Ok(())
        })
    }
}
