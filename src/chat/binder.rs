// src/chat/binder.rs
//! Binds the active conversation to the shared transport session.
//!
//! Activation order is strict: tear down the previous subscription, connect,
//! authenticate and wait for the acknowledgment, join, then subscribe. Every
//! activation bumps a generation counter; handlers and history loads carry
//! the generation they were started under and drop their work once it is
//! stale.

use super::merger::MessageMerger;
use crate::directory::{ApiError, HistorySource};
use crate::models::{Conversation, ConversationId, Message, RemoteTyping, SessionIdentity};
use crate::transport::{events, Transport, TransportError};
use crate::wire;
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Default)]
struct ActiveBinding {
    generation: u64,
    conversation: Option<Conversation>,
    remote_typing: bool,
}

pub struct ConversationBinder {
    transport: Arc<dyn Transport>,
    history: Arc<dyn HistorySource>,
    merger: Arc<Mutex<MessageMerger>>,
    active: Arc<RwLock<ActiveBinding>>,
    activation_lock: tokio::sync::Mutex<()>,
}

impl ConversationBinder {
    pub fn new(
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistorySource>,
        merger: Arc<Mutex<MessageMerger>>,
    ) -> Self {
        Self {
            transport,
            history,
            merger,
            active: Arc::new(RwLock::new(ActiveBinding::default())),
            activation_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .conversation
            .clone()
    }

    pub fn remote_typing(&self) -> bool {
        self.active.read().unwrap_or_else(|e| e.into_inner()).remote_typing
    }

    /// Snapshot of the active conversation's timeline
    pub fn timeline(&self) -> Vec<Message> {
        match self.active_conversation() {
            Some(conversation) => self
                .merger
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .snapshot(conversation.id),
            None => Vec::new(),
        }
    }

    /// Start a new generation with no active conversation. Anything still
    /// holding the previous generation becomes stale from here on.
    fn begin_generation(&self) -> u64 {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.generation += 1;
        active.conversation = None;
        active.remote_typing = false;
        active.generation
    }

    fn teardown(&self) {
        self.transport.unsubscribe(events::RECEIVE_MESSAGE);
        self.transport.unsubscribe(events::USER_TYPING);
    }

    /// Make `conversation` the active one, or deactivate with `None`.
    pub async fn activate(
        &self,
        conversation: Option<Conversation>,
        identity: &SessionIdentity,
    ) -> Result<(), TransportError> {
        let _guard = self.activation_lock.lock().await;

        let generation = self.begin_generation();
        self.teardown();

        let conversation = match conversation {
            Some(conversation) => conversation,
            None => {
                tracing::info!("💤 Chat binder deactivated");
                return Ok(());
            }
        };

        if !self.transport.state().is_connected() {
            self.transport.connect().await?;
        }

        if let Err(e) = self.transport.authenticate(&identity.token).await {
            tracing::warn!(
                conversation_id = %conversation.id,
                user_id = %identity.user_id(),
                "Chat authentication failed, not joining: {}",
                e
            );
            return Err(e);
        }

        self.transport.join_channel(&conversation.channel_token).await?;

        let conversation_id = conversation.id;
        {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            if active.generation != generation {
                return Ok(());
            }
            active.conversation = Some(conversation);
        }

        self.transport.subscribe(
            events::RECEIVE_MESSAGE,
            Arc::new(self.message_handler(conversation_id, generation)),
        );
        self.transport.subscribe(
            events::USER_TYPING,
            Arc::new(self.typing_handler(generation)),
        );

        tracing::info!(conversation_id = %conversation_id, "💬 Conversation bound to chat session");
        Ok(())
    }

    pub async fn deactivate(&self, identity: &SessionIdentity) {
        // Deactivation never touches the network, so it cannot fail
        let _ = self.activate(None, identity).await;
    }

    fn message_handler(
        &self,
        conversation_id: ConversationId,
        generation: u64,
    ) -> impl Fn(Value) + Send + Sync + 'static {
        let active = self.active.clone();
        let merger = self.merger.clone();
        move |payload: Value| {
            let message = match wire::message_from_value(payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Ignoring malformed inbound message: {}", e);
                    return;
                }
            };
            let active = active.read().unwrap_or_else(|e| e.into_inner());
            if active.generation != generation {
                tracing::debug!(message_id = %message.id, "dropping message for a stale binding");
                return;
            }
            merger
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .append(conversation_id, message);
        }
    }

    fn typing_handler(&self, generation: u64) -> impl Fn(Value) + Send + Sync + 'static {
        let active = self.active.clone();
        move |payload: Value| {
            let notice: RemoteTyping = match serde_json::from_value(payload) {
                Ok(notice) => notice,
                Err(e) => {
                    tracing::warn!("Ignoring malformed typing event: {}", e);
                    return;
                }
            };
            let mut active = active.write().unwrap_or_else(|e| e.into_inner());
            if active.generation == generation {
                active.remote_typing = notice.is_typing;
            }
        }
    }

    /// Fetch durable history for the active conversation and merge it in.
    /// Returns `Ok(false)` when nothing is active or the conversation changed
    /// while the request was in flight (the response is then discarded).
    pub async fn refresh_history(&self) -> Result<bool, ApiError> {
        let (generation, conversation_id) = {
            let active = self.active.read().unwrap_or_else(|e| e.into_inner());
            match active.conversation.as_ref() {
                Some(conversation) => (active.generation, conversation.id),
                None => return Ok(false),
            }
        };

        let history = self.history.fetch_history(conversation_id).await?;

        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        if active.generation != generation {
            tracing::debug!(
                conversation_id = %conversation_id,
                "discarding history for a conversation that is no longer active"
            );
            return Ok(false);
        }
        self.merger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reconcile(conversation_id, history);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, UserId, UserProfile};
    use crate::transport::testing::RecordingTransport;
    use crate::transport::SessionState;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    const GOOD_TOKEN: &str = "good-token";

    #[derive(Default)]
    struct StaticHistory {
        histories: HashMap<ConversationId, Vec<Message>>,
    }

    #[async_trait]
    impl HistorySource for StaticHistory {
        async fn fetch_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ApiError> {
            Ok(self.histories.get(&conversation_id).cloned().unwrap_or_default())
        }
    }

    /// Holds the first fetch until released
    struct GatedHistory {
        started: tokio::sync::Mutex<Option<oneshot::Sender<()>>>,
        release: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
        messages: Vec<Message>,
    }

    #[async_trait]
    impl HistorySource for GatedHistory {
        async fn fetch_history(&self, _conversation_id: ConversationId) -> Result<Vec<Message>, ApiError> {
            if let Some(started) = self.started.lock().await.take() {
                let _ = started.send(());
            }
            let release = self.release.lock().await.take();
            if let Some(release) = release {
                let _ = release.await;
            }
            Ok(self.messages.clone())
        }
    }

    fn identity(token: &str) -> SessionIdentity {
        SessionIdentity::new(
            token,
            UserProfile {
                id: UserId(7),
                username: "ana".to_string(),
                email: None,
            },
        )
    }

    fn conversation(id: i64) -> Conversation {
        Conversation {
            id: ConversationId(id),
            channel_token: format!("room-{}", id),
            owner: Some(UserId(7)),
            messages: Vec::new(),
        }
    }

    fn message(id: i64, secs: i64) -> Message {
        Message {
            id: MessageId(id),
            body: format!("m{}", id),
            sent_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            read: None,
            sender: Some(UserId(1)),
        }
    }

    fn binder_with(
        transport: Arc<RecordingTransport>,
        history: Arc<dyn HistorySource>,
    ) -> ConversationBinder {
        ConversationBinder::new(transport, history, Arc::new(Mutex::new(MessageMerger::new())))
    }

    fn position(trace: &[String], entry: &str) -> Option<usize> {
        trace.iter().position(|e| e == entry)
    }

    #[tokio::test]
    async fn test_join_only_after_successful_authentication() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let binder = binder_with(transport.clone(), Arc::new(StaticHistory::default()));

        binder.activate(Some(conversation(1)), &identity(GOOD_TOKEN)).await.unwrap();

        let trace = transport.trace();
        let connect = position(&trace, "connect").unwrap();
        let authenticated = position(&trace, "authenticated:true").unwrap();
        let join = position(&trace, "join_chat:room-1").unwrap();
        let subscribe = position(&trace, "subscribe:receive_message").unwrap();
        assert!(connect < authenticated);
        assert!(authenticated < join);
        assert!(join < subscribe);
        assert_eq!(transport.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_rejected_authentication_never_joins() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let binder = binder_with(transport.clone(), Arc::new(StaticHistory::default()));

        let result = binder.activate(Some(conversation(1)), &identity("expired")).await;

        assert!(matches!(result, Err(TransportError::AuthenticationRejected(_))));
        assert!(!transport.trace().iter().any(|e| e.starts_with("join_chat")));
        assert_eq!(transport.handler_count(), 0);
        assert!(binder.active_conversation().is_none());
        assert_eq!(transport.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_switching_conversations_keeps_one_subscription() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let binder = binder_with(transport.clone(), Arc::new(StaticHistory::default()));
        let session = identity(GOOD_TOKEN);

        for id in 1..=10 {
            binder.activate(Some(conversation(id)), &session).await.unwrap();
            assert_eq!(transport.handler_count(), 2);
        }
        assert_eq!(binder.active_conversation().unwrap().id, ConversationId(10));

        // Each activation tears down before it subscribes again
        let trace = transport.trace();
        let last_unsubscribe = trace.iter().rposition(|e| e == "unsubscribe:receive_message").unwrap();
        let last_join = position(&trace, "join_chat:room-10").unwrap();
        assert!(last_unsubscribe < last_join);
    }

    #[tokio::test]
    async fn test_inbound_message_is_merged_into_active_timeline() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let binder = binder_with(transport.clone(), Arc::new(StaticHistory::default()));
        binder.activate(Some(conversation(1)), &identity(GOOD_TOKEN)).await.unwrap();

        transport.deliver(
            events::RECEIVE_MESSAGE,
            json!({ "id": 42, "message": "oi", "sentAt": "2024-03-01T10:00:00Z", "user": 1 }),
        );
        transport.deliver(
            events::RECEIVE_MESSAGE,
            json!({ "id": 42, "message": "oi (confirmed)", "sentAt": "2024-03-01T10:00:01Z", "user": 1 }),
        );

        let timeline = binder.timeline();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].body, "oi (confirmed)");
    }

    #[tokio::test]
    async fn test_late_event_from_previous_binding_is_dropped() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let merger = Arc::new(Mutex::new(MessageMerger::new()));
        let binder = ConversationBinder::new(
            transport.clone(),
            Arc::new(StaticHistory::default()),
            merger.clone(),
        );
        let session = identity(GOOD_TOKEN);

        binder.activate(Some(conversation(1)), &session).await.unwrap();
        let stale_handler = transport.handler(events::RECEIVE_MESSAGE).unwrap();
        binder.activate(Some(conversation(2)), &session).await.unwrap();

        stale_handler(json!({ "id": 5, "message": "late", "sentAt": "2024-03-01T10:00:00Z" }));

        let merger = merger.lock().unwrap();
        assert!(merger.timeline(ConversationId(1)).is_empty());
        assert!(merger.timeline(ConversationId(2)).is_empty());
    }

    #[tokio::test]
    async fn test_typing_events_track_remote_state() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let binder = binder_with(transport.clone(), Arc::new(StaticHistory::default()));
        binder.activate(Some(conversation(1)), &identity(GOOD_TOKEN)).await.unwrap();

        transport.deliver(events::USER_TYPING, json!({ "userId": 1, "isTyping": true }));
        assert!(binder.remote_typing());
        transport.deliver(events::USER_TYPING, json!({ "isTyping": false }));
        assert!(!binder.remote_typing());
    }

    #[tokio::test]
    async fn test_deactivate_removes_handlers() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let binder = binder_with(transport.clone(), Arc::new(StaticHistory::default()));
        let session = identity(GOOD_TOKEN);

        binder.activate(Some(conversation(1)), &session).await.unwrap();
        binder.deactivate(&session).await;

        assert_eq!(transport.handler_count(), 0);
        assert!(binder.active_conversation().is_none());
        assert!(binder.timeline().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_history_loads_active_conversation() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let mut history = StaticHistory::default();
        history
            .histories
            .insert(ConversationId(1), vec![message(2, 20), message(1, 10)]);
        let binder = binder_with(transport.clone(), Arc::new(history));

        assert!(!binder.refresh_history().await.unwrap());

        binder.activate(Some(conversation(1)), &identity(GOOD_TOKEN)).await.unwrap();
        assert!(binder.refresh_history().await.unwrap());

        let ids: Vec<_> = binder.timeline().iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_stale_history_response_is_discarded() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let merger = Arc::new(Mutex::new(MessageMerger::new()));
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let history = GatedHistory {
            started: tokio::sync::Mutex::new(Some(started_tx)),
            release: tokio::sync::Mutex::new(Some(release_rx)),
            messages: vec![message(1, 10)],
        };
        let binder = Arc::new(ConversationBinder::new(
            transport.clone(),
            Arc::new(history),
            merger.clone(),
        ));
        let session = identity(GOOD_TOKEN);

        binder.activate(Some(conversation(1)), &session).await.unwrap();
        let pending = tokio::spawn({
            let binder = binder.clone();
            async move { binder.refresh_history().await }
        });
        started_rx.await.unwrap();

        binder.activate(Some(conversation(2)), &session).await.unwrap();
        release_tx.send(()).unwrap();

        assert!(!pending.await.unwrap().unwrap());
        let merger = merger.lock().unwrap();
        assert!(merger.timeline(ConversationId(1)).is_empty());
        assert!(merger.timeline(ConversationId(2)).is_empty());
    }

    #[tokio::test]
    async fn test_reactivation_after_disconnect_runs_full_sequence() {
        let transport = Arc::new(RecordingTransport::new(GOOD_TOKEN));
        let binder = binder_with(transport.clone(), Arc::new(StaticHistory::default()));
        let session = identity(GOOD_TOKEN);

        binder.activate(Some(conversation(1)), &session).await.unwrap();
        transport.drop_connection();
        binder.activate(binder.active_conversation(), &session).await.unwrap();

        let trace = transport.trace();
        let dropped = position(&trace, "disconnected").unwrap();
        let tail = &trace[dropped..];
        let connect = position(tail, "connect").unwrap();
        let authenticated = position(tail, "authenticated:true").unwrap();
        let join = position(tail, "join_chat:room-1").unwrap();
        assert!(connect < authenticated && authenticated < join);
    }
}
