// src/directory.rs
//! REST access to the user's conversations ("protocols") and their messages.
//!
//! Every operation has a strict `try_*` form. The plain form is fail-soft:
//! failures are logged and become an empty/absent result, so callers cannot
//! tell "nothing there" from "request failed".

use crate::models::{Conversation, ConversationId, Message, SessionContext, UserId};
use crate::wire;
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, Response};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("missing field `{0}` in backend payload")]
    MissingField(&'static str),
    #[error("malformed record {id}: {source}")]
    Malformed { id: i64, source: serde_json::Error },
}

/// Where the binder gets durable history from
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ConversationDirectory {
    client: Client,
    base_url: String,
    session: SessionContext,
}

impl ConversationDirectory {
    pub fn new(
        base_url: impl Into<String>,
        session: SessionContext,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    async fn read_json(response: Response) -> Result<Value, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Backend API error {}: {}", status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .header(AUTHORIZATION, self.session.identity().bearer())
            .query(query)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .header(AUTHORIZATION, self.session.identity().bearer())
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    /// List conversations owned by `user_id`, with message previews
    pub async fn try_list_conversations(&self, user_id: UserId) -> Result<Vec<Conversation>, ApiError> {
        let value = self
            .get_json(
                "protocols",
                &[
                    ("filters[user][id][$eq]", user_id.to_string()),
                    ("populate", "*".to_string()),
                ],
            )
            .await?;
        let conversations = wire::conversations_from_value(value)?;
        info!("💬 Found {} conversations for user {}", conversations.len(), user_id);
        Ok(conversations)
    }

    pub async fn list_conversations(&self, user_id: UserId) -> Vec<Conversation> {
        match self.try_list_conversations(user_id).await {
            Ok(conversations) => conversations,
            Err(e) => {
                error!("Failed to list conversations for user {}: {}", user_id, e);
                Vec::new()
            }
        }
    }

    /// Create a conversation with a fresh channel token. Does not check for
    /// an existing one; that is the caller's job.
    pub async fn try_create_conversation(&self, user_id: UserId) -> Result<Conversation, ApiError> {
        let channel_token = uuid::Uuid::new_v4().to_string();
        let body = json!({
            "data": {
                "protocol": channel_token,
                "user": user_id,
            }
        });
        let value = self.post_json("protocols", &body).await?;
        let conversation = wire::conversation_from_value(value)?;
        info!("🆕 Created conversation {} for user {}", conversation.id, user_id);
        Ok(conversation)
    }

    pub async fn create_conversation(&self, user_id: UserId) -> Option<Conversation> {
        match self.try_create_conversation(user_id).await {
            Ok(conversation) => Some(conversation),
            Err(e) => {
                error!("Failed to create conversation for user {}: {}", user_id, e);
                None
            }
        }
    }

    /// Full message list of one conversation, sender and timestamp populated
    pub async fn try_fetch_message_history(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ApiError> {
        let value = self
            .get_json(
                &format!("protocols/{}", conversation_id),
                &[("populate[messages][populate]", "*".to_string())],
            )
            .await?;
        let conversation = wire::conversation_from_value(value)?;
        tracing::debug!(
            "📜 Loaded {} messages for conversation {}",
            conversation.messages.len(),
            conversation_id
        );
        Ok(conversation.messages)
    }

    pub async fn fetch_message_history(&self, conversation_id: ConversationId) -> Vec<Message> {
        match self.try_fetch_message_history(conversation_id).await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to fetch history for conversation {}: {}", conversation_id, e);
                Vec::new()
            }
        }
    }

    /// Durable write of a message, for when the socket is unavailable. Strict
    /// only: the sender must know whether the message was stored.
    pub async fn try_create_message(
        &self,
        conversation_id: ConversationId,
        body: &str,
    ) -> Result<Message, ApiError> {
        let payload = json!({
            "data": {
                "message": body,
                "protocol": conversation_id,
                "user": self.session.user_id(),
                "sentAt": chrono::Utc::now(),
            }
        });
        let value = self.post_json("messages", &payload).await?;
        wire::message_from_value(value)
    }
}

#[async_trait]
impl HistorySource for ConversationDirectory {
    async fn fetch_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ApiError> {
        self.try_fetch_message_history(conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionIdentity, UserProfile};

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let session = SessionContext::new(SessionIdentity::new(
            "t",
            UserProfile {
                id: UserId(1),
                username: "ana".to_string(),
                email: None,
            },
        ));
        let directory =
            ConversationDirectory::new("http://localhost:1337/", session, Duration::from_secs(5)).unwrap();
        assert_eq!(directory.endpoint("protocols"), "http://localhost:1337/api/protocols");
    }
}
