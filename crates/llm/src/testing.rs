//! Deterministic fakes for downstream tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::agent::{Agent, AgentError};
use crate::message::{ChatHistory, ChatMessage};
use crate::service::{ChatCompletionService, ServiceError};
use crate::settings::ExecutionSettings;

/// Returns queued responses in order and records every request
#[derive(Default)]
pub struct ScriptedChatService {
    responses: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<(ChatHistory, ExecutionSettings)>>,
}

impl ScriptedChatService {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().push_back(Ok(response.into()));
    }

    pub fn push_error(&self, error: ServiceError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<(ChatHistory, ExecutionSettings)> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl ChatCompletionService for ScriptedChatService {
    fn service_id(&self) -> &str {
        "scripted"
    }

    async fn get_response(
        &self,
        history: &ChatHistory,
        settings: &ExecutionSettings,
    ) -> Result<ChatMessage, ServiceError> {
        self.requests.lock().push((history.clone(), settings.clone()));
        let next = self.responses.lock().pop_front();
        match next {
            Some(Ok(content)) => Ok(ChatMessage::assistant(content)),
            Some(Err(e)) => Err(e),
            None => Err(ServiceError::Provider("script exhausted".to_string())),
        }
    }
}

/// Agent that answers with queued replies, repeating the last one when the
/// queue runs dry
pub struct ScriptedAgent {
    name: String,
    description: Option<String>,
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    delay: Option<Duration>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedAgent {
    pub fn new<I, S>(name: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Conversations received, one entry per call
    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn get_response(&self, messages: &[ChatMessage]) -> Result<ChatMessage, AgentError> {
        self.seen.lock().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().pop_front();
        let content = match next {
            Some(reply) => {
                *self.last.lock() = Some(reply.clone());
                reply
            }
            None => self
                .last
                .lock()
                .clone()
                .ok_or_else(|| AgentError::InvalidInput(format!("{} has no scripted reply", self.name)))?,
        };

        Ok(ChatMessage::assistant(content).with_name(self.name.clone()))
    }
}

/// Agent that answers `"{name}: {last message content}"`
pub struct EchoAgent {
    name: String,
    description: Option<String>,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: Some(format!("Echoes the conversation as {}", name)),
            name,
        }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn get_response(&self, messages: &[ChatMessage]) -> Result<ChatMessage, AgentError> {
        let last = messages
            .last()
            .ok_or_else(|| AgentError::InvalidInput("empty conversation".to_string()))?;
        Ok(ChatMessage::assistant(format!("{}: {}", self.name, last.content))
            .with_name(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_service_reports_exhaustion() {
        let service = ScriptedChatService::new(["one"]);
        let history = ChatHistory::new();
        let settings = ExecutionSettings::default();

        assert_eq!(service.get_response(&history, &settings).await.unwrap().content, "one");
        assert!(service.get_response(&history, &settings).await.is_err());
        assert_eq!(service.request_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_agent_repeats_last_reply() {
        let agent = ScriptedAgent::new("a", ["first", "second"]);
        let input = [ChatMessage::user("go")];
        for expected in ["first", "second", "second"] {
            assert_eq!(agent.get_response(&input).await.unwrap().content, expected);
        }
        assert_eq!(agent.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_agent_delay_uses_tokio_time() {
        let agent = ScriptedAgent::new("slow", ["done"]).with_delay(Duration::from_secs(30));
        let started = tokio::time::Instant::now();

        let reply = agent.get_response(&[ChatMessage::user("go")]).await.unwrap();
        assert_eq!(reply.content, "done");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
