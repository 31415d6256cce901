// src/transport/socket.rs
//! WebSocket-backed transport session.
//!
//! One reader task dispatches inbound frames to handlers in arrival order and
//! one writer task drains the outbound queue, so emits never block callers.

use super::{
    events, AuthAck, EventHandler, Frame, HandlerRegistry, SessionState, Transport, TransportError,
};
use async_trait::async_trait;
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// State shared with the reader task
struct Shared {
    state: watch::Sender<SessionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    pending_auth: Mutex<Option<oneshot::Sender<AuthAck>>>,
    /// Token of the identity the session is authenticated as, if any
    identity: Mutex<Option<String>>,
    handlers: HandlerRegistry,
    /// Bumped per connection so a stale reader cannot tear down a newer one
    connection: AtomicU64,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "transport state change");
        }
    }

    /// Move to `next` only if still in `expected`
    fn transition(&self, expected: SessionState, next: SessionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == expected {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(from = %expected, to = %next, "transport state change");
        }
        changed
    }

    fn set_identity(&self, token: Option<String>) {
        *self.identity.lock().unwrap_or_else(|e| e.into_inner()) = token;
    }

    fn send_frame(&self, event: &str, data: Value) -> Result<(), TransportError> {
        let text = serde_json::to_string(&Frame::new(event, data))?;
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(sender) => sender
                .send(WsMessage::Text(text))
                .map_err(|_| TransportError::Disconnected),
            None => Err(TransportError::NotConnected),
        }
    }

    fn dispatch(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Ignoring malformed frame: {}", e);
                return;
            }
        };

        if frame.event == events::AUTHENTICATED {
            let ack: AuthAck = serde_json::from_value(frame.data).unwrap_or_else(|e| AuthAck {
                success: false,
                error: Some(format!("malformed acknowledgment: {}", e)),
            });
            let waiter = self
                .pending_auth
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(ack);
                }
                None => tracing::debug!("Unsolicited authentication acknowledgment"),
            }
            return;
        }

        if !self.handlers.dispatch(&frame.event, frame.data) {
            tracing::trace!(event = %frame.event, "no handler registered");
        }
    }

    fn on_disconnect(&self, connection: u64) {
        if self.connection.load(Ordering::SeqCst) != connection {
            return;
        }
        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
        // Dropping the waiter fails any in-flight authenticate()
        self.pending_auth
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.set_identity(None);
        if self.state() != SessionState::Disconnected {
            tracing::warn!("🔌 Transport disconnected");
        }
        self.set_state(SessionState::Disconnected);
    }
}

pub struct SocketSession {
    config: SocketConfig,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl SocketSession {
    pub fn new(config: SocketConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                state,
                outbound: Mutex::new(None),
                pending_auth: Mutex::new(None),
                identity: Mutex::new(None),
                handlers: HandlerRegistry::new(),
                connection: AtomicU64::new(0),
            }),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Observe state changes, e.g. to notice a dropped connection
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Token the session is currently authenticated with
    pub fn authenticated_as(&self) -> Option<String> {
        self.shared.identity.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Transport for SocketSession {
    fn state(&self) -> SessionState {
        self.shared.state()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        // Serializes attempts; a caller arriving mid-attempt waits for it
        let _guard = self.connect_lock.lock().await;
        if self.shared.state() != SessionState::Disconnected {
            tracing::debug!("connect() while {}, nothing to do", self.shared.state());
            return Ok(());
        }

        self.shared.set_state(SessionState::Connecting);
        tracing::info!(url = %self.config.url, "🔌 Connecting to chat server");

        let stream = match timeout(self.config.connect_timeout, connect_async(self.config.url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                tracing::error!("Failed to connect to chat server: {}", e);
                self.shared.set_state(SessionState::Disconnected);
                return Err(e.into());
            }
            Err(_) => {
                tracing::error!("Timed out connecting to chat server");
                self.shared.set_state(SessionState::Disconnected);
                return Err(TransportError::Timeout("connection"));
            }
        };

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let connection = self.shared.connection.fetch_add(1, Ordering::SeqCst) + 1;

        *self.shared.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        self.shared.set_state(SessionState::Connected);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!("Failed to write frame: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let shared = self.shared.clone();
        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                match item {
                    Ok(WsMessage::Text(text)) => shared.dispatch(&text),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Chat socket read error: {}", e);
                        break;
                    }
                }
            }
            shared.on_disconnect(connection);
        });

        tracing::info!("✅ Connected to chat server");
        Ok(())
    }

    async fn authenticate(&self, token: &str) -> Result<(), TransportError> {
        match self.shared.state() {
            SessionState::Disconnected | SessionState::Connecting => {
                return Err(TransportError::NotConnected)
            }
            SessionState::Authenticating => return Err(TransportError::AuthenticationInProgress),
            SessionState::Connected | SessionState::Authenticated => {}
        }

        let (tx, rx) = oneshot::channel();
        *self.shared.pending_auth.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        // Re-authenticating replaces the identity; none holds until the ack
        self.shared.set_identity(None);
        self.shared.set_state(SessionState::Authenticating);

        if let Err(e) = self
            .shared
            .send_frame(events::AUTHENTICATE, Value::String(token.to_string()))
        {
            self.shared.pending_auth.lock().unwrap_or_else(|e| e.into_inner()).take();
            self.shared
                .transition(SessionState::Authenticating, SessionState::Connected);
            return Err(e);
        }

        match timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(ack)) if ack.success => {
                self.shared.set_identity(Some(token.to_string()));
                if self
                    .shared
                    .transition(SessionState::Authenticating, SessionState::Authenticated)
                {
                    tracing::info!("🔐 Chat session authenticated");
                    Ok(())
                } else {
                    self.shared.set_identity(None);
                    Err(TransportError::Disconnected)
                }
            }
            Ok(Ok(ack)) => {
                self.shared
                    .transition(SessionState::Authenticating, SessionState::Connected);
                let reason = ack.error.unwrap_or_else(|| "authentication failed".to_string());
                tracing::warn!("Chat authentication rejected: {}", reason);
                Err(TransportError::AuthenticationRejected(reason))
            }
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                self.shared.pending_auth.lock().unwrap_or_else(|e| e.into_inner()).take();
                self.shared
                    .transition(SessionState::Authenticating, SessionState::Connected);
                Err(TransportError::Timeout("authentication acknowledgment"))
            }
        }
    }

    async fn join_channel(&self, channel_token: &str) -> Result<(), TransportError> {
        match self.shared.state() {
            SessionState::Authenticated => {}
            state if state.is_connected() => return Err(TransportError::NotAuthenticated),
            _ => return Err(TransportError::NotConnected),
        }
        self.shared
            .send_frame(events::JOIN_CHAT, Value::String(channel_token.to_string()))?;
        tracing::info!(channel = %channel_token, "📥 Joined chat channel");
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.shared.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.shared.send_frame(event, payload)?;
        tracing::debug!(event = %event, "📤 Emitted event");
        Ok(())
    }

    fn subscribe(&self, event: &str, handler: EventHandler) {
        if self.shared.handlers.insert(event, handler) {
            tracing::debug!(event = %event, "Replaced existing handler");
        }
    }

    fn unsubscribe(&self, event: &str) {
        if self.shared.handlers.remove(event) {
            tracing::debug!(event = %event, "Removed handler");
        }
    }

    fn handler_count(&self) -> usize {
        self.shared.handlers.len()
    }

    async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        if let Some(sender) = self.shared.outbound.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = sender.send(WsMessage::Close(None));
        }
        self.shared
            .on_disconnect(self.shared.connection.load(Ordering::SeqCst));
        tracing::info!("👋 Chat session closed");
    }
}
