// src/chat/client.rs
use super::binder::ConversationBinder;
use super::merger::MessageMerger;
use crate::directory::{ApiError, ConversationDirectory};
use crate::models::{Conversation, Message, OutgoingMessage, SessionContext, TypingNotice};
use crate::transport::{events, SessionState, Transport, TransportError};
use backoff::{future::retry, ExponentialBackoff};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Retry schedule for rebinding after a dropped connection. Keeps trying
/// until the server is back, at most every 30 seconds.
pub fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(30),
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("no conversation is open")]
    NoActiveConversation,
    #[error("could not open or create a conversation")]
    ConversationUnavailable,
}

/// What the UI drives: pick a conversation, send, type, read the timeline.
pub struct ChatClient {
    session: SessionContext,
    directory: Arc<ConversationDirectory>,
    transport: Arc<dyn Transport>,
    merger: Arc<Mutex<MessageMerger>>,
    binder: ConversationBinder,
    /// Last conversation opened; survives a failed rebind
    selected: Mutex<Option<Conversation>>,
}

impl ChatClient {
    pub fn new(
        session: SessionContext,
        directory: Arc<ConversationDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let merger = Arc::new(Mutex::new(MessageMerger::new()));
        let binder = ConversationBinder::new(transport.clone(), directory.clone(), merger.clone());
        Self {
            session,
            directory,
            transport,
            merger,
            binder,
            selected: Mutex::new(None),
        }
    }

    fn selected(&self) -> Option<Conversation> {
        self.selected.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.transport.state()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.directory.list_conversations(self.session.user_id()).await
    }

    /// Reuse the user's most recent conversation, creating one only when the
    /// list is known to be empty. A failed list never leads to a create.
    pub async fn open_or_create(&self) -> Result<Conversation, ChatError> {
        let existing = self
            .directory
            .try_list_conversations(self.session.user_id())
            .await?
            .into_iter()
            .max_by_key(|c| (c.last_message().map(|m| m.sent_at).unwrap_or_default(), c.id));

        let conversation = match existing {
            Some(conversation) => conversation,
            None => self
                .directory
                .create_conversation(self.session.user_id())
                .await
                .ok_or(ChatError::ConversationUnavailable)?,
        };

        self.open(conversation.clone()).await?;
        Ok(conversation)
    }

    /// Bind `conversation` and load its history. A failed history fetch is
    /// logged; the live channel stays usable.
    pub async fn open(&self, conversation: Conversation) -> Result<(), ChatError> {
        let conversation_id = conversation.id;
        *self.selected.lock().unwrap_or_else(|e| e.into_inner()) = Some(conversation.clone());
        self.binder
            .activate(Some(conversation), self.session.identity())
            .await?;

        if let Err(e) = self.binder.refresh_history().await {
            tracing::warn!(conversation_id = %conversation_id, "History unavailable: {}", e);
        }
        Ok(())
    }

    /// Send over the socket; when it is down, store the message over REST
    /// so it is not lost.
    pub async fn send_message(&self, body: &str) -> Result<(), ChatError> {
        let conversation = self.selected().ok_or(ChatError::NoActiveConversation)?;

        let bound = self.binder.active_conversation().map(|c| c.id) == Some(conversation.id);
        if bound && self.transport.state() == SessionState::Authenticated {
            let payload = OutgoingMessage {
                channel_token: conversation.channel_token.clone(),
                message: body.to_string(),
            };
            self.transport
                .emit(events::SEND_MESSAGE, serde_json::to_value(&payload).map_err(TransportError::from)?)
                .await?;
            return Ok(());
        }

        tracing::warn!(
            conversation_id = %conversation.id,
            "Chat socket is {}, storing message over REST",
            self.transport.state()
        );
        let message = self
            .directory
            .try_create_message(conversation.id, body)
            .await?;
        self.merger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .append(conversation.id, message);
        Ok(())
    }

    pub async fn set_typing(&self, is_typing: bool) -> Result<(), ChatError> {
        let conversation = self
            .binder
            .active_conversation()
            .ok_or(ChatError::NoActiveConversation)?;
        let notice = TypingNotice {
            channel_token: conversation.channel_token,
            is_typing,
        };
        self.transport
            .emit(events::TYPING, serde_json::to_value(&notice).map_err(TransportError::from)?)
            .await?;
        Ok(())
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.binder.active_conversation()
    }

    pub fn timeline(&self) -> Vec<Message> {
        self.binder.timeline()
    }

    pub fn remote_typing(&self) -> bool {
        self.binder.remote_typing()
    }

    /// Re-run connect, authenticate and join for the open conversation after
    /// the transport dropped.
    pub async fn reconnect(&self) -> Result<(), ChatError> {
        match self.selected() {
            Some(conversation) => {
                tracing::info!(conversation_id = %conversation.id, "🔄 Rebinding conversation");
                self.open(conversation).await
            }
            None => {
                self.transport.connect().await?;
                Ok(())
            }
        }
    }

    /// `reconnect` under an exponential backoff. A rejected token is final:
    /// only connection failures are retried.
    pub async fn reconnect_with_backoff(&self, policy: ExponentialBackoff) -> Result<(), ChatError> {
        let operation = || async {
            self.reconnect().await.map_err(|e| match e {
                ChatError::Transport(TransportError::AuthenticationRejected(_)) => {
                    tracing::error!("Chat authentication rejected, not retrying: {}", e);
                    backoff::Error::permanent(e)
                }
                other => {
                    tracing::warn!("Reconnect failed (retrying): {}", other);
                    backoff::Error::transient(other)
                }
            })
        };
        retry(policy, operation).await
    }

    pub async fn close(&self) {
        self.selected.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.binder.deactivate(self.session.identity()).await;
    }

    /// Leave the conversation and drop the connection (logout)
    pub async fn shutdown(&self) {
        self.close().await;
        self.transport.disconnect().await;
    }
}
