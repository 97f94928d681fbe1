//! Viewer-side chat state driven by lifecycle events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::LifecycleEvent;
use crate::splitter::split_thought_and_answer;
use crate::types::{MessageId, Role, SessionId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub thought_text: String,
    pub is_thinking_open: bool,
    pub show_thoughts: bool,
}

impl Message {
    fn user(content: String) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content,
            timestamp: Utc::now(),
            thought_text: String::new(),
            is_thinking_open: false,
            show_thoughts: false,
        }
    }

    fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            thought_text: String::new(),
            is_thinking_open: false,
            show_thoughts: true,
        }
    }
}

/// Messages of one viewer plus the raw buffers of its in-flight turns.
#[derive(Debug, Default)]
pub struct ChatView {
    messages: Vec<Message>,
    targets: HashMap<SessionId, MessageId>,
    buffers: HashMap<SessionId, String>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn is_loading(&self) -> bool {
        !self.targets.is_empty()
    }

    pub fn live_streams(&self) -> impl Iterator<Item = &SessionId> {
        self.targets.keys()
    }

    /// Adds the user message and an empty assistant message, and returns the
    /// fresh stream id the assistant message listens on.
    pub fn begin_turn(&mut self, user_text: impl Into<String>) -> (SessionId, MessageId) {
        self.messages.push(Message::user(user_text.into()));
        let assistant = Message::assistant_placeholder();
        let message_id = assistant.id.clone();
        self.messages.push(assistant);

        let stream_id = SessionId::new();
        self.targets.insert(stream_id.clone(), message_id.clone());
        self.buffers.insert(stream_id.clone(), String::new());
        (stream_id, message_id)
    }

    /// The background context refused the start request.
    pub fn fail_to_start(&mut self, stream_id: &SessionId) {
        if let Some(message_id) = self.forget(stream_id) {
            if let Some(message) = self.message_mut(&message_id) {
                message.content = "Failed to start request.".to_string();
                message.show_thoughts = false;
            }
        }
    }

    /// Applies one lifecycle event; returns false when it belongs to a stream
    /// this viewer does not track.
    pub fn apply(&mut self, event: &LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::Chunk { stream_id, text } => {
                let Some(message_id) = self.targets.get(stream_id).cloned() else {
                    return false;
                };
                let buffer = self.buffers.entry(stream_id.clone()).or_default();
                buffer.push_str(text);
                let split = split_thought_and_answer(buffer);

                if let Some(message) = self.message_mut(&message_id) {
                    let should_show = !split.thoughts.is_empty()
                        || split.is_thinking_open
                        || split.has_open_marker;
                    message.show_thoughts = should_show && !split.thinking_ended();
                    message.is_thinking_open = split.is_thinking_open;
                    message.content = split.answer;
                    message.thought_text = split.thoughts;
                }
                true
            }
            LifecycleEvent::Done { stream_id } | LifecycleEvent::Error { stream_id, .. } => {
                let Some(message_id) = self.forget(stream_id) else {
                    return false;
                };
                if let Some(message) = self.message_mut(&message_id) {
                    message.is_thinking_open = false;
                    message.show_thoughts = false;
                }
                true
            }
        }
    }

    /// Drops every in-flight turn and returns the ids the background context
    /// should cancel.
    pub fn cancel_all(&mut self) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self.targets.keys().cloned().collect();
        for id in &ids {
            self.forget(id);
        }
        ids
    }

    pub fn toggle_thoughts(&mut self, id: &MessageId) {
        if let Some(message) = self.message_mut(id) {
            message.show_thoughts = !message.show_thoughts;
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn forget(&mut self, stream_id: &SessionId) -> Option<MessageId> {
        self.buffers.remove(stream_id);
        self.targets.remove(stream_id)
    }

    fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}
