// src/chat/merger.rs
//! Per-conversation timelines built from REST history and live events.
//!
//! Invariant: every timeline is sorted ascending by `sent_at` and holds each
//! message id at most once.

use crate::models::{ConversationId, Message};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MessageMerger {
    timelines: HashMap<ConversationId, Vec<Message>>,
}

impl MessageMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the timeline with fetched history. Duplicate ids keep the last
    /// occurrence.
    pub fn load(&mut self, conversation_id: ConversationId, history: Vec<Message>) {
        let mut timeline: Vec<Message> = Vec::with_capacity(history.len());
        for message in history {
            if let Some(pos) = timeline.iter().position(|m| m.id == message.id) {
                timeline.remove(pos);
            }
            timeline.push(message);
        }
        // Stable, so equal timestamps keep their relative order
        timeline.sort_by_key(|m| m.sent_at);

        tracing::debug!(
            conversation_id = %conversation_id,
            count = timeline.len(),
            "timeline loaded"
        );
        self.timelines.insert(conversation_id, timeline);
    }

    /// Insert one live message in timestamp order. An entry with the same id
    /// is replaced (last write wins on content).
    pub fn append(&mut self, conversation_id: ConversationId, message: Message) {
        let timeline = self.timelines.entry(conversation_id).or_default();

        if let Some(pos) = timeline.iter().position(|m| m.id == message.id) {
            timeline.remove(pos);
        }

        let index = timeline.partition_point(|m| m.sent_at <= message.sent_at);
        timeline.insert(index, message);
    }

    /// Load history but keep live messages the fetch did not include yet
    pub fn reconcile(&mut self, conversation_id: ConversationId, history: Vec<Message>) {
        let live = self.timelines.remove(&conversation_id).unwrap_or_default();
        self.load(conversation_id, history);
        let timeline = self.timelines.entry(conversation_id).or_default();
        let missing: Vec<Message> = live
            .into_iter()
            .filter(|m| !timeline.iter().any(|stored| stored.id == m.id))
            .collect();
        for message in missing {
            self.append(conversation_id, message);
        }
    }

    pub fn timeline(&self, conversation_id: ConversationId) -> &[Message] {
        self.timelines
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn snapshot(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.timeline(conversation_id).to_vec()
    }

    pub fn len(&self, conversation_id: ConversationId) -> usize {
        self.timeline(conversation_id).len()
    }

    pub fn clear(&mut self, conversation_id: ConversationId) {
        self.timelines.remove(&conversation_id);
    }
}
