// src/chat/mod.rs
//! Chat session synchronization: binding a conversation to the transport and
//! keeping its timeline consistent.

pub mod binder;
pub mod client;
pub mod merger;

pub use binder::ConversationBinder;
pub use client::{reconnect_backoff, ChatClient, ChatError};
pub use merger::MessageMerger;
