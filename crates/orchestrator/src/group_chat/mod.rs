//! Group chat orchestration
//!
//! Every member sees the whole conversation. A [`GroupChatManager`] picks the
//! next speaker each turn and decides when the discussion is over.

mod actors;
pub mod manager;

use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use llm::{Agent, ChatHistory, ChatMessage};
use std::future::Future;
use std::sync::Arc;

use crate::base::{MemberState, Orchestration, OrchestrationPattern, RunContext};
use crate::error::OrchestrationError;
use crate::payload::ChatPayload;
use actors::{GroupChatAgentActor, GroupChatManagerActor};

pub use manager::{
    BooleanResult, GroupChatManager, GroupChatPrompts, MessageResult, ParticipantDescriptions,
    PromptedGroupChatManager, RoundRobinGroupChatManager, StringResult, TurnContext,
};

const MANAGER_NAME: &str = "GroupChatManagerActor";

/// Task delivered to every participant before the first turn
#[derive(Debug, Clone)]
pub struct GroupChatStart {
    pub body: ChatPayload,
}

/// Asks the named participant to speak
#[derive(Debug, Clone)]
pub struct GroupChatRequest {
    pub agent_name: String,
}

/// A contribution to the conversation, broadcast to everyone else
#[derive(Debug, Clone)]
pub struct GroupChatResponse {
    pub body: ChatMessage,
}

/// Produces the user's reply when the manager asks for input
pub type HumanResponseFn =
    Arc<dyn Fn(ChatHistory) -> BoxFuture<'static, Result<ChatMessage, OrchestrationError>> + Send + Sync>;

pub type GroupChatOrchestration<TIn = ChatPayload, TOut = ChatPayload> =
    Orchestration<GroupChatPattern, TIn, TOut>;

pub struct GroupChatPattern {
    manager: Arc<dyn GroupChatManager>,
    human_response: Option<HumanResponseFn>,
}

impl GroupChatPattern {
    pub fn new(manager: impl GroupChatManager) -> Self {
        Self {
            manager: Arc::new(manager),
            human_response: None,
        }
    }

    pub fn with_human_response<F, Fut>(mut self, respond: F) -> Self
    where
        F: Fn(ChatHistory) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ChatMessage, OrchestrationError>> + Send + 'static,
    {
        self.human_response = Some(Arc::new(move |history: ChatHistory| respond(history).boxed()));
        self
    }
}

impl<TIn, TOut> Orchestration<GroupChatPattern, TIn, TOut>
where
    TIn: serde::Serialize + Send + 'static,
    TOut: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Group chat driven by `manager`
    pub fn group_chat(
        manager: impl GroupChatManager,
        members: Vec<Arc<dyn Agent>>,
    ) -> Result<Self, OrchestrationError> {
        Self::new(GroupChatPattern::new(manager), members)
    }
}

pub(crate) fn participant_descriptions(members: &[Arc<dyn Agent>]) -> ParticipantDescriptions {
    members
        .iter()
        .map(|agent| (agent.name(), agent.description().unwrap_or_default()))
        .collect()
}

#[async_trait]
impl OrchestrationPattern for GroupChatPattern {
    fn default_name(&self) -> &'static str {
        "GroupChatOrchestration"
    }

    fn prepare(&self, run: &RunContext) -> Result<(), OrchestrationError> {
        let topic = run.topic()?;

        for agent in run.members.iter() {
            let member = MemberState::new(agent.clone(), run);
            let topic = topic.clone();
            run.register(agent.name(), true, move |_id| {
                Ok(GroupChatAgentActor::new(member.clone(), topic.clone()))
            })?;
        }

        let manager = self.manager.clone();
        let participants = participant_descriptions(&run.members);
        let human_response = self.human_response.clone();
        let completion = run.completion.clone();
        run.register(MANAGER_NAME, true, move |_id| {
            Ok(GroupChatManagerActor::new(
                manager.clone(),
                participants.clone(),
                human_response.clone(),
                completion.clone(),
                topic.clone(),
            ))
        })?;
        Ok(())
    }

    async fn start(&self, task: ChatPayload, run: RunContext) -> Result<(), OrchestrationError> {
        try_join_all(run.members.iter().map(|agent| {
            run.send(GroupChatStart { body: task.clone() }, agent.name())
        }))
        .await?;
        run.send(GroupChatStart { body: task }, MANAGER_NAME).await
    }
}
