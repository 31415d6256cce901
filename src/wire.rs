// src/wire.rs
//! Backend payload normalization
//!
//! The content API answers in two shapes: the nested one (`{id, attributes}`,
//! relations wrapped in `{data: ...}`) and the flat one (`{id, ...fields}`,
//! relations inlined or given as bare ids). Everything is mapped here into the
//! canonical types in `models` so nothing downstream branches on shape.

use crate::directory::ApiError;
use crate::models::{Conversation, ConversationId, Message, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug)]
pub struct NestedEntity<T> {
    pub id: i64,
    pub attributes: T,
}

#[derive(Debug)]
pub struct FlatEntity<T> {
    pub id: i64,
    pub fields: T,
}

/// A backend record in either shape. The shape is picked by the presence of
/// `attributes`, so a malformed nested record fails with its own error
/// instead of passing as an empty flat one.
#[derive(Debug)]
pub enum Entity<T> {
    Nested(NestedEntity<T>),
    Flat(FlatEntity<T>),
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Entity<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut object = Map::<String, Value>::deserialize(deserializer)?;
        let id = object
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| D::Error::missing_field("id"))?;

        match object.remove("attributes") {
            Some(attributes) => {
                let attributes = T::deserialize(attributes)
                    .map_err(|e| D::Error::custom(format!("record {}: {}", id, e)))?;
                Ok(Entity::Nested(NestedEntity { id, attributes }))
            }
            None => {
                let fields = T::deserialize(Value::Object(object))
                    .map_err(|e| D::Error::custom(format!("record {}: {}", id, e)))?;
                Ok(Entity::Flat(FlatEntity { id, fields }))
            }
        }
    }
}

impl<T> Entity<T> {
    pub fn into_parts(self) -> (i64, T) {
        match self {
            Entity::Nested(e) => (e.id, e.attributes),
            Entity::Flat(e) => (e.id, e.fields),
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Entity::Nested(e) => e.id,
            Entity::Flat(e) => e.id,
        }
    }
}

/// A relation field: a bare id, an inlined record/list, or a `{data}` wrapper
#[derive(Debug, Deserialize)]
#[serde(untagged, bound(deserialize = "T: DeserializeOwned"))]
pub enum Related<T> {
    Id(i64),
    Inline(OneOrMany<Entity<T>>),
    Envelope { data: Option<OneOrMany<Entity<T>>> },
}

impl<T> Related<T> {
    pub fn into_entities(self) -> Vec<Entity<T>> {
        match self {
            Related::Id(_) => Vec::new(),
            Related::Inline(items) => items.into_vec(),
            Related::Envelope { data } => data.map(OneOrMany::into_vec).unwrap_or_default(),
        }
    }

    pub fn first_id(&self) -> Option<i64> {
        match self {
            Related::Id(id) => Some(*id),
            Related::Inline(OneOrMany::One(entity)) => Some(entity.id()),
            Related::Inline(OneOrMany::Many(items)) => items.first().map(Entity::id),
            Related::Envelope { data: Some(OneOrMany::One(entity)) } => Some(entity.id()),
            Related::Envelope { data: Some(OneOrMany::Many(items)) } => {
                items.first().map(Entity::id)
            }
            Related::Envelope { data: None } => None,
        }
    }
}

/// Top-level response document. Records stay raw here and are decoded one
/// by one, so a bad record can be reported and skipped on its own.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Document {
    Envelope { data: OneOrMany<Entity<Value>> },
    Bare(OneOrMany<Entity<Value>>),
}

impl Document {
    pub fn into_entities(self) -> Vec<Entity<Value>> {
        match self {
            Document::Envelope { data } => data.into_vec(),
            Document::Bare(items) => items.into_vec(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFields {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageFields {
    #[serde(default, alias = "body", alias = "content")]
    pub message: Option<String>,
    #[serde(default, rename = "sentAt", alias = "sent_at")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default, alias = "sender")]
    pub user: Option<Related<UserFields>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationFields {
    #[serde(default, alias = "channelToken", alias = "channel_token")]
    pub protocol: Option<String>,
    #[serde(default, alias = "owner")]
    pub user: Option<Related<UserFields>>,
    #[serde(default)]
    pub messages: Option<Related<Value>>,
}

/// Decode the fields of a raw record, naming the record on failure
fn decode_fields<T: DeserializeOwned>(entity: Entity<Value>) -> Result<(i64, T), ApiError> {
    let (id, raw) = entity.into_parts();
    serde_json::from_value(raw)
        .map(|fields| (id, fields))
        .map_err(|source| ApiError::Malformed { id, source })
}

/// Canonical sender: the related user's id, whatever shape it came in
fn sender_of(user: Option<&Related<UserFields>>) -> Option<UserId> {
    user.and_then(Related::first_id).map(UserId)
}

fn message_from_fields(id: i64, fields: MessageFields) -> Result<Message, ApiError> {
    let sent_at = fields
        .sent_at
        .or(fields.created_at)
        .ok_or(ApiError::MissingField("sentAt"))?;
    Ok(Message {
        id: MessageId(id),
        body: fields.message.unwrap_or_default(),
        sent_at,
        read: fields.read,
        sender: sender_of(fields.user.as_ref()),
    })
}

/// Messages that cannot be decoded or ordered are dropped with a warning
pub fn message_from_entity(entity: Entity<Value>) -> Option<Message> {
    let id = entity.id();
    match decode_fields::<MessageFields>(entity).and_then(|(id, fields)| message_from_fields(id, fields)) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(message_id = id, "dropping message: {}", e);
            None
        }
    }
}

pub fn conversation_from_entity(entity: Entity<Value>) -> Result<Conversation, ApiError> {
    let (id, fields): (i64, ConversationFields) = decode_fields(entity)?;
    let channel_token = fields
        .protocol
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::MissingField("protocol"))?;

    let mut messages: Vec<Message> = fields
        .messages
        .map(Related::into_entities)
        .unwrap_or_default()
        .into_iter()
        .filter_map(message_from_entity)
        .collect();
    messages.sort_by_key(|m| m.sent_at);

    Ok(Conversation {
        id: ConversationId(id),
        channel_token,
        owner: sender_of(fields.user.as_ref()),
        messages,
    })
}

/// Decode a list response. Records without a channel token are skipped.
pub fn conversations_from_value(value: Value) -> Result<Vec<Conversation>, ApiError> {
    let document: Document = serde_json::from_value(value)?;
    let conversations = document
        .into_entities()
        .into_iter()
        .filter_map(|entity| {
            let id = entity.id();
            match conversation_from_entity(entity) {
                Ok(conversation) => Some(conversation),
                Err(e) => {
                    tracing::warn!(conversation_id = id, "skipping conversation: {}", e);
                    None
                }
            }
        })
        .collect();
    Ok(conversations)
}

/// Decode a single-record response
pub fn conversation_from_value(value: Value) -> Result<Conversation, ApiError> {
    let document: Document = serde_json::from_value(value)?;
    let entity = document
        .into_entities()
        .into_iter()
        .next()
        .ok_or(ApiError::MissingField("data"))?;
    conversation_from_entity(entity)
}

pub fn message_from_value(value: Value) -> Result<Message, ApiError> {
    let document: Document = serde_json::from_value(value)?;
    let entity = document
        .into_entities()
        .into_iter()
        .next()
        .ok_or(ApiError::MissingField("data"))?;
    let (id, fields) = decode_fields::<MessageFields>(entity)?;
    message_from_fields(id, fields)
}
