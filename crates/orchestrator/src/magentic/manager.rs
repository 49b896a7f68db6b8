//! Magentic planning manager
//!
//! The manager keeps a task ledger (facts and plan) and, each round, a
//! progress ledger answering five questions about the conversation. The
//! actor in [`super::actors`] turns those answers into turns, resets and the
//! final answer.

use async_trait::async_trait;
use llm::{
    get_structured_response, AuthorRole, ChatCompletionService, ChatHistory, ChatMessage,
    ExecutionSettings, PromptRenderer, TeraRenderer,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::prompts;
use crate::error::OrchestrationError;
use crate::group_chat::ParticipantDescriptions;

pub const DEFAULT_MAX_STALL_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerFlag {
    pub reason: String,
    pub answer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerText {
    pub reason: String,
    pub answer: String,
}

/// Answers to the per-round progress questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressLedger {
    pub is_request_satisfied: LedgerFlag,
    pub is_in_loop: LedgerFlag,
    pub is_progress_being_made: LedgerFlag,
    pub next_speaker: LedgerText,
    pub instruction_or_question: LedgerText,
}

#[async_trait]
pub trait MagenticManager: Send + Sync + 'static {
    /// Stalled rounds tolerated before the plan is reset
    fn max_stall_count(&self) -> usize {
        DEFAULT_MAX_STALL_COUNT
    }

    /// Rounds after which the run is wrapped up with a final answer
    fn max_round_count(&self) -> Option<usize> {
        None
    }

    /// Resets after which the run is wrapped up with a final answer
    fn max_reset_count(&self) -> Option<usize> {
        None
    }

    /// Gather facts and draft a plan. With `old_facts`, revise both after a
    /// stall.
    async fn create_facts_and_plan(
        &self,
        history: &ChatHistory,
        task: &ChatMessage,
        participants: &ParticipantDescriptions,
        old_facts: Option<&ChatMessage>,
    ) -> Result<(ChatMessage, ChatMessage), OrchestrationError>;

    async fn create_task_ledger(
        &self,
        task: &ChatMessage,
        facts: &ChatMessage,
        plan: &ChatMessage,
        participants: &ParticipantDescriptions,
    ) -> Result<String, OrchestrationError>;

    async fn create_progress_ledger(
        &self,
        history: &ChatHistory,
        task: &ChatMessage,
        participants: &ParticipantDescriptions,
    ) -> Result<ProgressLedger, OrchestrationError>;

    async fn prepare_final_answer(
        &self,
        history: &ChatHistory,
        task: &ChatMessage,
    ) -> Result<ChatMessage, OrchestrationError>;
}

/// Templates used by [`StandardMagenticManager`]
#[derive(Debug, Clone)]
pub struct MagenticPrompts {
    pub facts: String,
    pub plan: String,
    pub facts_update: String,
    pub plan_update: String,
    pub task_ledger: String,
    pub progress_ledger: String,
    pub final_answer: String,
}

impl Default for MagenticPrompts {
    fn default() -> Self {
        Self {
            facts: prompts::FACTS_PROMPT.to_string(),
            plan: prompts::PLAN_PROMPT.to_string(),
            facts_update: prompts::FACTS_UPDATE_PROMPT.to_string(),
            plan_update: prompts::PLAN_UPDATE_PROMPT.to_string(),
            task_ledger: prompts::TASK_LEDGER_PROMPT.to_string(),
            progress_ledger: prompts::PROGRESS_LEDGER_PROMPT.to_string(),
            final_answer: prompts::FINAL_ANSWER_PROMPT.to_string(),
        }
    }
}

/// Magentic manager backed by a chat completion service
pub struct StandardMagenticManager {
    service: Arc<dyn ChatCompletionService>,
    renderer: Arc<dyn PromptRenderer>,
    settings: ExecutionSettings,
    prompts: MagenticPrompts,
    max_stall_count: usize,
    max_round_count: Option<usize>,
    max_reset_count: Option<usize>,
}

impl StandardMagenticManager {
    pub fn new(service: Arc<dyn ChatCompletionService>) -> Self {
        Self {
            service,
            renderer: Arc::new(TeraRenderer),
            settings: ExecutionSettings::default(),
            prompts: MagenticPrompts::default(),
            max_stall_count: DEFAULT_MAX_STALL_COUNT,
            max_round_count: None,
            max_reset_count: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PromptRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_prompts(mut self, prompts: MagenticPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_max_stall_count(mut self, max_stall_count: usize) -> Self {
        self.max_stall_count = max_stall_count;
        self
    }

    pub fn with_max_round_count(mut self, max_round_count: usize) -> Self {
        self.max_round_count = Some(max_round_count);
        self
    }

    pub fn with_max_reset_count(mut self, max_reset_count: usize) -> Self {
        self.max_reset_count = Some(max_reset_count);
        self
    }

    fn render(&self, template: &str, variables: serde_json::Value) -> Result<String, OrchestrationError> {
        Ok(self.renderer.render(template, &variables)?)
    }

    async fn complete(&self, history: &ChatHistory) -> Result<ChatMessage, OrchestrationError> {
        Ok(self.service.get_response(history, &self.settings).await?)
    }
}

#[async_trait]
impl MagenticManager for StandardMagenticManager {
    fn max_stall_count(&self) -> usize {
        self.max_stall_count
    }

    fn max_round_count(&self) -> Option<usize> {
        self.max_round_count
    }

    fn max_reset_count(&self) -> Option<usize> {
        self.max_reset_count
    }

    async fn create_facts_and_plan(
        &self,
        history: &ChatHistory,
        task: &ChatMessage,
        participants: &ParticipantDescriptions,
        old_facts: Option<&ChatMessage>,
    ) -> Result<(ChatMessage, ChatMessage), OrchestrationError> {
        let mut history = history.clone();
        let team = participants.to_string();

        let facts_prompt = match old_facts {
            Some(old) => self.render(
                &self.prompts.facts_update,
                json!({ "task": task.content, "old_facts": old.content }),
            )?,
            None => self.render(&self.prompts.facts, json!({ "task": task.content }))?,
        };
        history.add_user(facts_prompt);
        let facts = self.complete(&history).await?;
        history.add_message(facts.clone());

        let plan_template = match old_facts {
            Some(_) => &self.prompts.plan_update,
            None => &self.prompts.plan,
        };
        history.add_user(self.render(plan_template, json!({ "team": team }))?);
        let plan = self.complete(&history).await?;

        debug!(revised = old_facts.is_some(), "Facts and plan created");
        Ok((facts, plan))
    }

    async fn create_task_ledger(
        &self,
        task: &ChatMessage,
        facts: &ChatMessage,
        plan: &ChatMessage,
        participants: &ParticipantDescriptions,
    ) -> Result<String, OrchestrationError> {
        self.render(
            &self.prompts.task_ledger,
            json!({
                "task": task.content,
                "team": participants.to_string(),
                "facts": facts.content,
                "plan": plan.content,
            }),
        )
    }

    async fn create_progress_ledger(
        &self,
        history: &ChatHistory,
        task: &ChatMessage,
        participants: &ParticipantDescriptions,
    ) -> Result<ProgressLedger, OrchestrationError> {
        let prompt = self.render(
            &self.prompts.progress_ledger,
            json!({
                "task": task.content,
                "team": participants.to_string(),
                "names": participants.names().join(", "),
            }),
        )?;
        let mut history = history.clone();
        history.add_user(prompt);

        let ledger: ProgressLedger =
            get_structured_response(self.service.as_ref(), &history, &self.settings).await?;
        Ok(ledger)
    }

    async fn prepare_final_answer(
        &self,
        history: &ChatHistory,
        task: &ChatMessage,
    ) -> Result<ChatMessage, OrchestrationError> {
        let mut history = history.clone();
        history.add_user(self.render(&self.prompts.final_answer, json!({ "task": task.content }))?);

        let mut answer = self.complete(&history).await?;
        answer.role = AuthorRole::Assistant;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::testing::ScriptedChatService;

    fn team() -> ParticipantDescriptions {
        [("Researcher", "Finds sources"), ("Coder", "Writes code")]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_facts_then_plan_share_one_history() {
        let service = Arc::new(ScriptedChatService::new(["the facts", "the plan"]));
        let manager = StandardMagenticManager::new(service.clone());
        let task = ChatMessage::user("Compare two sorting algorithms");

        let (facts, plan) = manager
            .create_facts_and_plan(&ChatHistory::new(), &task, &team(), None)
            .await
            .unwrap();
        assert_eq!(facts.content, "the facts");
        assert_eq!(plan.content, "the plan");

        let requests = service.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].0.messages()[0].content.contains("Compare two sorting algorithms"));
        let second = requests[1].0.messages();
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].content, "the facts");
        assert!(second[2].content.contains("Researcher: Finds sources"));
    }

    #[tokio::test]
    async fn test_update_prompts_carry_old_facts() {
        let service = Arc::new(ScriptedChatService::new(["new facts", "new plan"]));
        let manager = StandardMagenticManager::new(service.clone());
        let task = ChatMessage::user("task");
        let old = ChatMessage::assistant("stale facts");

        manager
            .create_facts_and_plan(&ChatHistory::new(), &task, &team(), Some(&old))
            .await
            .unwrap();
        let first = &service.requests()[0].0;
        assert!(first.messages()[0].content.contains("stale facts"));
    }

    #[tokio::test]
    async fn test_progress_ledger_is_structured() {
        let ledger = json!({
            "is_request_satisfied": { "reason": "not yet", "answer": false },
            "is_in_loop": { "reason": "no", "answer": false },
            "is_progress_being_made": { "reason": "yes", "answer": true },
            "next_speaker": { "reason": "needs code", "answer": "Coder" },
            "instruction_or_question": { "reason": "", "answer": "Write it" }
        });
        let service = Arc::new(ScriptedChatService::new([ledger.to_string()]));
        let manager = StandardMagenticManager::new(service.clone());

        let parsed = manager
            .create_progress_ledger(&ChatHistory::new(), &ChatMessage::user("task"), &team())
            .await
            .unwrap();
        assert_eq!(parsed.next_speaker.answer, "Coder");
        assert!(parsed.is_progress_being_made.answer);

        let (history, settings) = &service.requests()[0];
        assert!(history.messages()[0].content.contains("Researcher, Coder"));
        assert_eq!(settings.response_format.as_ref().unwrap().name, "ProgressLedger");
    }

    #[tokio::test]
    async fn test_malformed_progress_ledger_fails() {
        let service = Arc::new(ScriptedChatService::new([r#"{"is_request_satisfied": true}"#]));
        let manager = StandardMagenticManager::new(service);

        let err = manager
            .create_progress_ledger(&ChatHistory::new(), &ChatMessage::user("task"), &team())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::StructuredOutput(_)));
    }

    #[tokio::test]
    async fn test_task_ledger_includes_everything() {
        let manager = StandardMagenticManager::new(Arc::new(ScriptedChatService::default()));
        let ledger = manager
            .create_task_ledger(
                &ChatMessage::user("the task"),
                &ChatMessage::assistant("the facts"),
                &ChatMessage::assistant("the plan"),
                &team(),
            )
            .await
            .unwrap();

        for expected in ["the task", "the facts", "the plan", "Coder: Writes code"] {
            assert!(ledger.contains(expected), "missing {expected}");
        }
    }
}
