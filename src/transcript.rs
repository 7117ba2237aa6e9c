//! Transcript of the active conversation.
//!
//! The transcript is owned by the conversation controller; nothing else
//! mutates it. Assistant text only grows by appending tokens while a
//! message is streaming, and loader placeholders are the only messages
//! that are ever removed.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifier of a transcript message, unique within one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg_{}", self.0)
    }
}

/// One entry of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub is_user: bool,
    pub is_complete: bool,
    pub is_streaming: bool,
    pub is_error: bool,
    pub is_loader: bool,
    pub timestamp: DateTime<Utc>,
}

/// Ordered list of messages plus the id counter.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Drop every message. Ids keep increasing so stale references never alias.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn push(&mut self, text: String, build: impl FnOnce(&mut Message)) -> MessageId {
        self.next_id += 1;
        let id = MessageId(self.next_id);
        let mut message = Message {
            id,
            text,
            is_user: false,
            is_complete: true,
            is_streaming: false,
            is_error: false,
            is_loader: false,
            timestamp: Utc::now(),
        };
        build(&mut message);
        self.messages.push(message);
        id
    }

    /// Append a completed user message.
    pub fn push_user(&mut self, text: impl Into<String>) -> MessageId {
        self.push(text.into(), |m| m.is_user = true)
    }

    /// Append a completed standalone assistant message.
    pub fn push_assistant(&mut self, text: impl Into<String>) -> MessageId {
        self.push(text.into(), |_| {})
    }

    /// Append a standalone error message.
    pub fn push_error(&mut self, text: impl Into<String>) -> MessageId {
        self.push(text.into(), |m| m.is_error = true)
    }

    /// Begin an empty, incomplete assistant message that tokens will stream into.
    pub fn begin_streaming(&mut self) -> MessageId {
        self.push(String::new(), |m| {
            m.is_complete = false;
            m.is_streaming = true;
        })
    }

    /// Append one token to a streaming message.
    ///
    /// The first token becomes the text; every later token is preceded by
    /// `separator`. Returns `false` if the message is missing or no longer
    /// streaming.
    pub fn append_token(&mut self, id: MessageId, token: &str, separator: &str) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.is_streaming)
        else {
            return false;
        };
        if !message.text.is_empty() {
            message.text.push_str(separator);
        }
        message.text.push_str(token);
        true
    }

    /// Mark a message complete and no longer streaming. Text is kept as-is.
    pub fn finalize(&mut self, id: MessageId) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.is_complete = true;
                message.is_streaming = false;
                true
            }
            None => false,
        }
    }

    /// Replace the text of a user message (voice placeholder → transcript).
    pub fn replace_user_text(&mut self, id: MessageId, text: impl Into<String>) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id && m.is_user) {
            Some(message) => {
                message.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Insert a loader placeholder, removing any existing one first.
    pub fn set_loader(&mut self, label: impl Into<String>) -> MessageId {
        self.remove_loader();
        self.push(label.into(), |m| {
            m.is_loader = true;
            m.is_complete = false;
        })
    }

    /// Remove the loader placeholder. Returns whether one existed.
    pub fn remove_loader(&mut self) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_loader);
        before != self.messages.len()
    }

    pub fn loader_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_loader).count()
    }
}
