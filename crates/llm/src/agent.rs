//! Orchestration members
//!
//! An [`Agent`] is the unit an orchestration coordinates: it has a name other
//! members and managers can refer to, a description used by LLM-driven
//! managers when picking speakers, and a way to answer a conversation.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::message::{AuthorRole, ChatHistory, ChatMessage};
use crate::service::{ChatCompletionService, ServiceError};
use crate::settings::ExecutionSettings;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Produce the next message of the conversation
    async fn get_response(&self, messages: &[ChatMessage]) -> Result<ChatMessage, AgentError>;
}

/// Agent backed by a chat completion service and fixed instructions
pub struct ChatCompletionAgent {
    name: String,
    description: Option<String>,
    instructions: Option<String>,
    service: Arc<dyn ChatCompletionService>,
    settings: ExecutionSettings,
}

impl ChatCompletionAgent {
    pub fn new(name: impl Into<String>, service: Arc<dyn ChatCompletionService>) -> Self {
        Self {
            name: name.into(),
            description: None,
            instructions: None,
            service,
            settings: ExecutionSettings::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    fn build_history(&self, messages: &[ChatMessage]) -> ChatHistory {
        let mut history = match &self.instructions {
            Some(instructions) => ChatHistory::with_system(instructions.clone()),
            None => ChatHistory::new(),
        };
        history.extend(messages.iter().cloned());
        history
    }
}

#[async_trait]
impl Agent for ChatCompletionAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[instrument(skip(self, messages), fields(agent = %self.name, messages = messages.len()))]
    async fn get_response(&self, messages: &[ChatMessage]) -> Result<ChatMessage, AgentError> {
        let history = self.build_history(messages);
        let mut response = self.service.get_response(&history, &self.settings).await?;

        if response.role != AuthorRole::Assistant {
            debug!(role = %response.role, "Service answered with a non-assistant role");
        }
        response.name = Some(self.name.clone());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        seen: Mutex<Vec<ChatHistory>>,
    }

    #[async_trait]
    impl ChatCompletionService for Recording {
        async fn get_response(
            &self,
            history: &ChatHistory,
            _settings: &ExecutionSettings,
        ) -> Result<ChatMessage, ServiceError> {
            self.seen.lock().push(history.clone());
            Ok(ChatMessage::assistant("done"))
        }
    }

    #[tokio::test]
    async fn test_prepends_instructions_and_names_reply() {
        let service = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let agent = ChatCompletionAgent::new("writer", service.clone())
            .with_instructions("You write.")
            .with_description("Writes drafts");

        let reply = agent
            .get_response(&[ChatMessage::user("draft a haiku")])
            .await
            .unwrap();

        assert_eq!(reply.name.as_deref(), Some("writer"));
        let seen = service.seen.lock();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0].messages()[0].role, AuthorRole::System);
        assert_eq!(agent.description(), Some("Writes drafts"));
    }
}
