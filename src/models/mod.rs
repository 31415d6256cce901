// src/models/mod.rs
pub mod chat;
pub mod session;

pub use chat::{
    Conversation, ConversationId, Message, MessageId, OutgoingMessage, RemoteTyping, TypingNotice,
    UserId,
};
pub use session::{SessionContext, SessionIdentity, TokenClaims, UserProfile};
