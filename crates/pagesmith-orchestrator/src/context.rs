// Conversation context for one project
//
// Prior turns are read-only input to a run: they drive mode classification
// and are replayed to the model ahead of the new request.

use chrono::{DateTime, Utc};
use pagesmith_abstraction::ChatMessage;
use serde::{Deserialize, Serialize};

/// Message in conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role (user, assistant, system)
    pub role: String,
    /// Message content
    pub content: String,
    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into(), timestamp: Utc::now() }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into(), timestamp: Utc::now() }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into(), timestamp: Utc::now() }
    }

    /// Whether this turn was written by the assistant.
    pub fn is_assistant(&self) -> bool {
        self.role.eq_ignore_ascii_case("assistant")
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self { role: message.role.to_ascii_lowercase(), content: message.content.clone() }
    }
}

/// Prior turns of one project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Project identifier
    pub project_id: String,
    /// Turns, oldest first
    #[serde(default)]
    pub turns: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new(project_id: impl Into<String>) -> Self {
        Self { project_id: project_id.into(), turns: Vec::new() }
    }

    /// Append a turn
    #[must_use]
    pub fn with_turn(mut self, message: Message) -> Self {
        self.turns.push(message);
        self
    }

    /// Get recent conversation history (last N messages)
    pub fn recent_history(&self, n: usize) -> &[Message] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// The most recent turn, if it came from the assistant.
    pub fn trailing_assistant_turn(&self) -> Option<&Message> {
        self.turns.last().filter(|m| m.is_assistant())
    }

    /// Recent turns as model messages, skipping system turns.
    pub fn to_chat_messages(&self, n: usize) -> Vec<ChatMessage> {
        self.recent_history(n)
            .iter()
            .filter(|m| !m.role.eq_ignore_ascii_case("system"))
            .map(ChatMessage::from)
            .collect()
    }
}
