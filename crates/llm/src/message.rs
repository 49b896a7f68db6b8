//! Chat message model shared by services, agents and orchestrations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for AuthorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorRole::System => write!(f, "system"),
            AuthorRole::User => write!(f, "user"),
            AuthorRole::Assistant => write!(f, "assistant"),
            AuthorRole::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: AuthorRole,
    pub content: String,
    /// Name of the participant that authored the message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: AuthorRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::System, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}): {}", self.role, name, self.content),
            None => write!(f, "{}: {}", self.role, self.content),
        }
    }
}

/// Ordered conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with a system message
    pub fn with_system(instructions: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.add_message(ChatMessage::system(instructions));
        history
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add_message(ChatMessage::user(content));
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add_message(ChatMessage::assistant(content));
    }

    pub fn extend<I: IntoIterator<Item = ChatMessage>>(&mut self, messages: I) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

impl From<Vec<ChatMessage>> for ChatHistory {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

impl<'a> IntoIterator for &'a ChatHistory {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Incremental piece of a streamed response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AuthorRole>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl MessageDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            role: None,
            content: content.into(),
            name: None,
        }
    }

    /// Fold deltas into a full message. The first role/name seen wins; the role
    /// defaults to assistant.
    pub fn merge<I: IntoIterator<Item = MessageDelta>>(deltas: I) -> ChatMessage {
        let mut message = ChatMessage::assistant(String::new());
        let mut role_seen = false;

        for delta in deltas {
            if let (false, Some(role)) = (role_seen, delta.role) {
                message.role = role;
                role_seen = true;
            }
            if message.name.is_none() {
                message.name = delta.name;
            }
            message.content.push_str(&delta.content);
        }

        message
    }
}

impl From<ChatMessage> for MessageDelta {
    fn from(message: ChatMessage) -> Self {
        Self {
            role: Some(message.role),
            content: message.content,
            name: message.name,
        }
    }
}
