// src/transport/mod.rs
//! Real-time transport session
//!
//! One long-lived bidirectional connection per app session, authenticated
//! after connect. The lifecycle is an explicit state machine:
//!
//! `Disconnected -> Connecting -> Connected -> Authenticating -> Authenticated`
//!
//! A rejected authentication falls back to `Connected`; a dropped connection
//! falls back to `Disconnected` and nothing (auth, joined channel) survives it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub mod socket;

#[cfg(test)]
pub(crate) mod testing;

pub use socket::{SocketConfig, SocketSession};

/// Named events of the chat channel
pub mod events {
    pub const AUTHENTICATE: &str = "authenticate";
    pub const AUTHENTICATED: &str = "authenticated";
    pub const JOIN_CHAT: &str = "join_chat";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const RECEIVE_MESSAGE: &str = "receive_message";
    pub const TYPING: &str = "typing";
    pub const USER_TYPING: &str = "user_typing";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
}

impl SessionState {
    /// True once the connection-established event has fired
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Authenticating | SessionState::Authenticated
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

/// One wire frame: `{"event": <name>, "data": <payload>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Payload of the `authenticated` acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthAck {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport is not authenticated")]
    NotAuthenticated,
    #[error("an authentication is already in flight")]
    AuthenticationInProgress,
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),
    #[error("connection lost")]
    Disconnected,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Inbound event callback. Handlers of one session never run concurrently.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// At most one handler per event name; inserting replaces.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, event: &str, handler: EventHandler) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(event.to_string(), handler).is_some()
    }

    pub fn remove(&self, event: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.remove(event).is_some()
    }

    pub fn get(&self, event: &str) -> Option<EventHandler> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(event).cloned()
    }

    pub fn len(&self) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke the handler for `event`, if any. The lock is released first so a
    /// handler may (un)subscribe.
    pub fn dispatch(&self, event: &str, payload: Value) -> bool {
        match self.get(event) {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }
}

/// The operations the chat layer needs from a live connection
#[async_trait]
pub trait Transport: Send + Sync {
    fn state(&self) -> SessionState;

    /// Establish the connection. Returns once connected; a no-op when already
    /// connected.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send the bearer token and wait for the `authenticated` acknowledgment.
    /// Rejected with `NotConnected` before the connection is established.
    async fn authenticate(&self, token: &str) -> Result<(), TransportError>;

    /// Fire-and-forget join. Rejected with `NotAuthenticated` before a
    /// successful authentication.
    async fn join_channel(&self, channel_token: &str) -> Result<(), TransportError>;

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    fn subscribe(&self, event: &str, handler: EventHandler);

    fn unsubscribe(&self, event: &str);

    fn handler_count(&self) -> usize;

    async fn disconnect(&self);
}
