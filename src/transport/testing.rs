// src/transport/testing.rs
// In-memory transport that records every call, for binder and client tests

use super::{EventHandler, Frame, HandlerRegistry, SessionState, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) struct RecordingTransport {
    accepted_token: String,
    state: Mutex<SessionState>,
    trace: Mutex<Vec<String>>,
    emitted: Mutex<Vec<Frame>>,
    handlers: HandlerRegistry,
    failing_connects: AtomicUsize,
}

impl RecordingTransport {
    pub fn new(accepted_token: &str) -> Self {
        Self {
            accepted_token: accepted_token.to_string(),
            state: Mutex::new(SessionState::Disconnected),
            trace: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
            handlers: HandlerRegistry::new(),
            failing_connects: AtomicUsize::new(0),
        }
    }

    pub fn trace(&self) -> Vec<String> {
        self.trace.lock().unwrap().clone()
    }

    pub fn emitted(&self) -> Vec<Frame> {
        self.emitted.lock().unwrap().clone()
    }

    /// Simulate an inbound event from the server
    pub fn deliver(&self, event: &str, payload: Value) -> bool {
        self.handlers.dispatch(event, payload)
    }

    pub fn handler(&self, event: &str) -> Option<EventHandler> {
        self.handlers.get(event)
    }

    /// Make the next `count` connect attempts fail as if the server were down
    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Simulate network loss
    pub fn drop_connection(&self) {
        *self.state.lock().unwrap() = SessionState::Disconnected;
        self.record("disconnected".to_string());
    }

    fn record(&self, entry: String) {
        self.trace.lock().unwrap().push(entry);
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.record("connect".to_string());
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Timeout("connection"));
        }
        if self.state() == SessionState::Disconnected {
            self.set_state(SessionState::Connected);
        }
        Ok(())
    }

    async fn authenticate(&self, token: &str) -> Result<(), TransportError> {
        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.record("authenticate".to_string());
        if token == self.accepted_token {
            self.set_state(SessionState::Authenticated);
            self.record("authenticated:true".to_string());
            Ok(())
        } else {
            self.set_state(SessionState::Connected);
            self.record("authenticated:false".to_string());
            Err(TransportError::AuthenticationRejected("invalid token".to_string()))
        }
    }

    async fn join_channel(&self, channel_token: &str) -> Result<(), TransportError> {
        if self.state() != SessionState::Authenticated {
            return Err(TransportError::NotAuthenticated);
        }
        self.record(format!("join_chat:{}", channel_token));
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.record(format!("emit:{}", event));
        self.emitted.lock().unwrap().push(Frame::new(event, payload));
        Ok(())
    }

    fn subscribe(&self, event: &str, handler: EventHandler) {
        self.record(format!("subscribe:{}", event));
        self.handlers.insert(event, handler);
    }

    fn unsubscribe(&self, event: &str) {
        self.record(format!("unsubscribe:{}", event));
        self.handlers.remove(event);
    }

    fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    async fn disconnect(&self) {
        self.drop_connection();
    }
}
