// lib.rs - Conecta Elas chat session client
pub mod chat;
pub mod config;
pub mod directory;
pub mod logging;
pub mod models;
pub mod storage;
pub mod transport;
pub mod wire;

// Re-export commonly used types for convenience
pub use chat::{ChatClient, ChatError, ConversationBinder, MessageMerger};
pub use config::{Config, ConfigError};
pub use directory::{ApiError, ConversationDirectory, HistorySource};
pub use models::*;
pub use storage::{SessionStore, StorageError};
pub use transport::{SessionState, SocketConfig, SocketSession, Transport, TransportError};
