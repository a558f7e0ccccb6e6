use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::MessageId;

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// The child using the chat.
    Child,
    /// The assistant replying to the child.
    Assistant,
}

/// A single message in a conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a child message timestamped now.
    pub fn child(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::Child,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant message timestamped now.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_from_child(&self) -> bool {
        self.role == MessageRole::Child
    }

    /// Does the message end in (or contain) a direct question?
    pub fn contains_question(&self) -> bool {
        self.content.contains('?')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_role() {
        assert!(ChatMessage::child("hi").is_from_child());
        assert!(!ChatMessage::assistant("hello").is_from_child());
    }

    #[test]
    fn question_detection() {
        assert!(ChatMessage::child("can we play a game?").contains_question());
        assert!(!ChatMessage::child("let's play a game").contains_question());
    }
}
