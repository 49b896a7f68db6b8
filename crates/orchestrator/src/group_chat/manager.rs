//! Group chat managers
//!
//! A manager is consulted once per turn and decides whether to ask the user,
//! whether to stop, and who speaks next. Managers are stateless; the manager
//! actor tracks the conversation and the round counter.

use async_trait::async_trait;
use llm::{
    get_structured_response, ChatCompletionService, ChatHistory, ChatMessage, ExecutionSettings,
    PromptRenderer, TeraRenderer,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::OrchestrationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BooleanResult {
    pub result: bool,
    pub reason: String,
}

impl BooleanResult {
    pub fn new(result: bool, reason: impl Into<String>) -> Self {
        Self {
            result,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StringResult {
    pub result: String,
    pub reason: String,
}

impl StringResult {
    pub fn new(result: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResult {
    pub result: ChatMessage,
    pub reason: String,
}

/// Ordered `name -> description` table of the participants
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantDescriptions {
    entries: Vec<(String, String)>,
}

impl ParticipantDescriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, description: impl Into<String>) {
        let name = name.into();
        let description = description.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = description,
            None => self.entries.push((name, description)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, description)| description.as_str())
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d.as_str()))
    }
}

impl<N: Into<String>, D: Into<String>> FromIterator<(N, D)> for ParticipantDescriptions {
    fn from_iter<I: IntoIterator<Item = (N, D)>>(iter: I) -> Self {
        let mut descriptions = Self::new();
        for (name, description) in iter {
            descriptions.insert(name, description);
        }
        descriptions
    }
}

/// One `name: description` line per participant
impl fmt::Display for ParticipantDescriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, description)) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", name, description)?;
        }
        Ok(())
    }
}

/// What a manager sees when asked for a decision
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub history: &'a ChatHistory,
    /// Number of agent turns requested so far
    pub round: usize,
    pub participants: &'a ParticipantDescriptions,
}

#[async_trait]
pub trait GroupChatManager: Send + Sync + 'static {
    fn max_rounds(&self) -> Option<usize> {
        None
    }

    async fn should_request_user_input(
        &self,
        _turn: TurnContext<'_>,
    ) -> Result<BooleanResult, OrchestrationError> {
        Ok(BooleanResult::new(false, "No user input required"))
    }

    async fn should_terminate(&self, turn: TurnContext<'_>) -> Result<BooleanResult, OrchestrationError> {
        Ok(round_limit(self.max_rounds(), turn.round))
    }

    async fn select_next_agent(&self, turn: TurnContext<'_>) -> Result<StringResult, OrchestrationError>;

    async fn filter_results(&self, turn: TurnContext<'_>) -> Result<MessageResult, OrchestrationError> {
        let last = turn
            .history
            .last()
            .cloned()
            .ok_or_else(|| OrchestrationError::Internal("conversation is empty".to_string()))?;
        Ok(MessageResult {
            result: last,
            reason: "The last message in the conversation".to_string(),
        })
    }
}

fn round_limit(max_rounds: Option<usize>, round: usize) -> BooleanResult {
    match max_rounds {
        Some(max) if round >= max => BooleanResult::new(true, "Maximum rounds reached"),
        Some(_) => BooleanResult::new(false, "Maximum rounds not reached"),
        None => BooleanResult::new(false, "No round limit"),
    }
}

/// Participants take turns in declaration order
#[derive(Debug, Clone, Default)]
pub struct RoundRobinGroupChatManager {
    max_rounds: Option<usize>,
}

impl RoundRobinGroupChatManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }
}

#[async_trait]
impl GroupChatManager for RoundRobinGroupChatManager {
    fn max_rounds(&self) -> Option<usize> {
        self.max_rounds
    }

    async fn select_next_agent(&self, turn: TurnContext<'_>) -> Result<StringResult, OrchestrationError> {
        let names = turn.participants.names();
        if names.is_empty() {
            return Err(OrchestrationError::EmptyMembers);
        }
        let next = names[turn.round % names.len()];
        Ok(StringResult::new(next, format!("Round-robin turn {}", turn.round)))
    }
}

/// Prompt templates of [`PromptedGroupChatManager`]
///
/// Rendered with `topic`, `participants` (list of `{name, description}`),
/// `participant_names` and `round`.
#[derive(Debug, Clone)]
pub struct GroupChatPrompts {
    pub termination: String,
    pub selection: String,
    pub filter: String,
    /// Disabled when `None`
    pub user_input: Option<String>,
}

impl Default for GroupChatPrompts {
    fn default() -> Self {
        Self {
            termination: TERMINATION_PROMPT.to_string(),
            selection: SELECTION_PROMPT.to_string(),
            filter: FILTER_PROMPT.to_string(),
            user_input: None,
        }
    }
}

const TERMINATION_PROMPT: &str = "\
You are moderating a discussion about: {{ topic }}

Participants:
{% for p in participants %}- {{ p.name }}: {{ p.description }}
{% endfor %}
Round {{ round }} has just finished. Decide whether the discussion has reached \
a satisfying conclusion. Set `result` to true to end it and explain why in `reason`.";

const SELECTION_PROMPT: &str = "\
You are moderating a discussion about: {{ topic }}

Participants:
{% for p in participants %}- {{ p.name }}: {{ p.description }}
{% endfor %}
Pick the participant who should speak next. `result` must be exactly one of: \
{{ participant_names | join(sep=\", \") }}.";

const FILTER_PROMPT: &str = "\
You moderated a discussion about: {{ topic }}

Summarize the outcome of the discussion in `result` for someone who did not \
follow it. Explain in `reason` what you kept.";

/// Decisions come from a chat completion service with structured output
pub struct PromptedGroupChatManager {
    service: Arc<dyn ChatCompletionService>,
    renderer: Arc<dyn PromptRenderer>,
    topic: String,
    settings: ExecutionSettings,
    prompts: GroupChatPrompts,
    max_rounds: Option<usize>,
}

impl PromptedGroupChatManager {
    pub fn new(topic: impl Into<String>, service: Arc<dyn ChatCompletionService>) -> Self {
        Self {
            service,
            renderer: Arc::new(TeraRenderer),
            topic: topic.into(),
            settings: ExecutionSettings::default(),
            prompts: GroupChatPrompts::default(),
            max_rounds: None,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PromptRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_prompts(mut self, prompts: GroupChatPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Ask the user for input whenever `prompt` says so
    pub fn with_user_input_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompts.user_input = Some(prompt.into());
        self
    }

    fn render(&self, template: &str, turn: &TurnContext<'_>) -> Result<String, OrchestrationError> {
        let participants: Vec<_> = turn
            .participants
            .iter()
            .map(|(name, description)| json!({ "name": name, "description": description }))
            .collect();
        let variables = json!({
            "topic": self.topic,
            "participants": participants,
            "participant_names": turn.participants.names(),
            "round": turn.round,
        });
        Ok(self.renderer.render(template, &variables)?)
    }

    /// System prompt, then the conversation, then the closing instruction
    async fn decide<T>(
        &self,
        template: &str,
        instruction: &str,
        turn: &TurnContext<'_>,
    ) -> Result<T, OrchestrationError>
    where
        T: serde::de::DeserializeOwned + JsonSchema,
    {
        let mut history = ChatHistory::with_system(self.render(template, turn)?);
        history.extend(turn.history.iter().cloned());
        history.add_user(instruction);
        let decision = get_structured_response::<T>(self.service.as_ref(), &history, &self.settings).await?;
        Ok(decision)
    }
}

#[async_trait]
impl GroupChatManager for PromptedGroupChatManager {
    fn max_rounds(&self) -> Option<usize> {
        self.max_rounds
    }

    async fn should_request_user_input(
        &self,
        turn: TurnContext<'_>,
    ) -> Result<BooleanResult, OrchestrationError> {
        let Some(template) = &self.prompts.user_input else {
            return Ok(BooleanResult::new(false, "User input is disabled"));
        };
        self.decide(template, "Decide whether to ask the user for input.", &turn)
            .await
    }

    async fn should_terminate(&self, turn: TurnContext<'_>) -> Result<BooleanResult, OrchestrationError> {
        let limit = round_limit(self.max_rounds, turn.round);
        if limit.result {
            return Ok(limit);
        }
        let decision: BooleanResult = self
            .decide(&self.prompts.termination, "Decide whether the discussion should end.", &turn)
            .await?;
        debug!(terminate = decision.result, reason = %decision.reason, "Termination decision");
        Ok(decision)
    }

    async fn select_next_agent(&self, turn: TurnContext<'_>) -> Result<StringResult, OrchestrationError> {
        let decision: StringResult = self
            .decide(&self.prompts.selection, "Now select the next participant to speak.", &turn)
            .await?;
        debug!(next = %decision.result, reason = %decision.reason, "Selection decision");
        Ok(decision)
    }

    async fn filter_results(&self, turn: TurnContext<'_>) -> Result<MessageResult, OrchestrationError> {
        let summary: StringResult = self
            .decide(&self.prompts.filter, "Summarize the discussion.", &turn)
            .await?;
        Ok(MessageResult {
            result: ChatMessage::assistant(summary.result),
            reason: summary.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::testing::ScriptedChatService;
    use llm::AuthorRole;
    use rstest::rstest;

    fn team() -> ParticipantDescriptions {
        [("Writer", "Drafts copy"), ("Reviewer", "Reviews copy")]
            .into_iter()
            .collect()
    }

    #[rstest]
    #[case(0, "Writer")]
    #[case(1, "Reviewer")]
    #[case(2, "Writer")]
    #[case(7, "Reviewer")]
    #[tokio::test]
    async fn test_round_robin_selection(#[case] round: usize, #[case] expected: &str) {
        let history = ChatHistory::new();
        let participants = team();
        let turn = TurnContext {
            history: &history,
            round,
            participants: &participants,
        };

        let next = RoundRobinGroupChatManager::new().select_next_agent(turn).await.unwrap();
        assert_eq!(next.result, expected);
    }

    #[rstest]
    #[case(Some(3), 2, false)]
    #[case(Some(3), 3, true)]
    #[case(None, 100, false)]
    #[tokio::test]
    async fn test_round_limit(#[case] max: Option<usize>, #[case] round: usize, #[case] expected: bool) {
        let mut manager = RoundRobinGroupChatManager::new();
        manager.max_rounds = max;
        let history = ChatHistory::new();
        let participants = team();
        let turn = TurnContext {
            history: &history,
            round,
            participants: &participants,
        };

        assert_eq!(manager.should_terminate(turn).await.unwrap().result, expected);
    }

    #[tokio::test]
    async fn test_prompted_selection_renders_team() {
        let service = Arc::new(ScriptedChatService::new([
            r#"{"result": "Reviewer", "reason": "needs review"}"#,
        ]));
        let manager = PromptedGroupChatManager::new("slogans", service.clone());

        let mut history = ChatHistory::new();
        history.add_user("Write a slogan");
        let participants = team();
        let turn = TurnContext {
            history: &history,
            round: 1,
            participants: &participants,
        };

        let next = manager.select_next_agent(turn).await.unwrap();
        assert_eq!(next.result, "Reviewer");

        let requests = service.requests();
        let (sent, settings) = &requests[0];
        let system = &sent.messages()[0];
        assert_eq!(system.role, AuthorRole::System);
        assert!(system.content.contains("- Writer: Drafts copy"));
        assert!(system.content.contains("Writer, Reviewer"));
        assert_eq!(sent.messages()[1].content, "Write a slogan");
        assert_eq!(settings.response_format.as_ref().unwrap().name, "StringResult");
    }

    #[tokio::test]
    async fn test_prompted_malformed_response_fails() {
        let service = Arc::new(ScriptedChatService::new(["maybe?"]));
        let manager = PromptedGroupChatManager::new("slogans", service);
        let history = ChatHistory::new();
        let participants = team();
        let turn = TurnContext {
            history: &history,
            round: 1,
            participants: &participants,
        };

        let err = manager.should_terminate(turn).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::StructuredOutput(_)));
    }

    #[tokio::test]
    async fn test_prompted_round_limit_short_circuits() {
        let service = Arc::new(ScriptedChatService::default());
        let manager = PromptedGroupChatManager::new("slogans", service.clone()).with_max_rounds(2);
        let history = ChatHistory::new();
        let participants = team();
        let turn = TurnContext {
            history: &history,
            round: 2,
            participants: &participants,
        };

        assert!(manager.should_terminate(turn).await.unwrap().result);
        assert_eq!(service.request_count(), 0);
    }

    #[test]
    fn test_participant_descriptions_display() {
        assert_eq!(team().to_string(), "Writer: Drafts copy\nReviewer: Reviews copy");
        assert_eq!(team().get("Reviewer"), Some("Reviews copy"));
    }

    proptest::proptest! {
        #[test]
        fn prop_insert_keeps_first_position(names in proptest::collection::vec("[a-z]{1,4}", 1..12)) {
            let table: ParticipantDescriptions = names.iter().map(|n| (n.clone(), format!("{}!", n))).collect();
            let mut unique: Vec<&str> = Vec::new();
            for name in &names {
                if !unique.contains(&name.as_str()) {
                    unique.push(name);
                }
            }
            proptest::prop_assert_eq!(table.names(), unique);
        }
    }
}
