// src/models/chat.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned numeric id of a conversation ("protocol")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

/// Server-assigned numeric id of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

/// Numeric id of a backend user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single chat message. Ordering key is `sent_at`, never arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub read: Option<bool>,
    /// Absent when the backend omits the sender relation
    pub sender: Option<UserId>,
}

impl Message {
    pub fn is_from(&self, user_id: UserId) -> bool {
        self.sender == Some(user_id)
    }
}

/// A support conversation. `channel_token` is the real-time room key and is
/// distinct from the numeric `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub channel_token: String,
    pub owner: Option<UserId>,
    /// Previews in list results, the full history when fetched individually
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.iter().max_by_key(|m| m.sent_at)
    }
}

/// Payload of the outbound `send_message` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub channel_token: String,
    pub message: String,
}

/// Payload of the outbound `typing` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub channel_token: String,
    pub is_typing: bool,
}

/// Payload of the inbound `user_typing` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTyping {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub is_typing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: i64, secs: i64) -> Message {
        Message {
            id: MessageId(id),
            body: format!("message {}", id),
            sent_at: Utc.timestamp_opt(secs, 0).unwrap(),
            read: None,
            sender: Some(UserId(7)),
        }
    }

    #[test]
    fn test_last_message_uses_timestamp_not_position() {
        let conversation = Conversation {
            id: ConversationId(1),
            channel_token: "room".to_string(),
            owner: Some(UserId(7)),
            messages: vec![message(1, 300), message(2, 100)],
        };
        assert_eq!(conversation.last_message().unwrap().id, MessageId(1));
    }

    #[test]
    fn test_outgoing_message_uses_camel_case() {
        let payload = OutgoingMessage {
            channel_token: "abc".to_string(),
            message: "oi".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["channelToken"], "abc");
        assert_eq!(value["message"], "oi");
    }
}
