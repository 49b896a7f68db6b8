//! Magentic orchestration
//!
//! A planning manager gathers facts, drafts a plan and then steers the team
//! one instruction at a time, re-planning when progress stalls.

mod actors;
pub mod manager;
pub mod prompts;

use async_trait::async_trait;
use futures::future::try_join_all;
use llm::{Agent, ChatMessage};
use std::sync::Arc;

use crate::base::{MemberState, Orchestration, OrchestrationPattern, RunContext};
use crate::error::OrchestrationError;
use crate::group_chat::participant_descriptions;
use crate::payload::ChatPayload;
use actors::{MagenticAgentActor, MagenticManagerActor};

pub use manager::{
    LedgerFlag, LedgerText, MagenticManager, MagenticPrompts, ProgressLedger,
    StandardMagenticManager, DEFAULT_MAX_STALL_COUNT,
};

pub(crate) const MANAGER_NAME: &str = "MagenticManagerActor";

/// The task, sent to every actor of the run
#[derive(Debug, Clone)]
pub struct MagenticStart {
    pub body: ChatMessage,
}

/// Asks the named participant to act on the latest instruction
#[derive(Debug, Clone)]
pub struct MagenticRequest {
    pub agent_name: String,
}

/// Ledger, instruction or participant output, broadcast to everyone else
#[derive(Debug, Clone)]
pub struct MagenticResponse {
    pub body: ChatMessage,
}

/// Clears every participant's conversation after a re-plan
#[derive(Debug, Clone, Copy)]
pub struct MagenticReset;

pub type MagenticOrchestration<TIn = ChatPayload, TOut = ChatPayload> =
    Orchestration<MagenticPattern, TIn, TOut>;

pub struct MagenticPattern {
    manager: Arc<dyn MagenticManager>,
}

impl MagenticPattern {
    pub fn new(manager: impl MagenticManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }
}

impl<TIn, TOut> Orchestration<MagenticPattern, TIn, TOut>
where
    TIn: serde::Serialize + Send + 'static,
    TOut: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn magentic(
        manager: impl MagenticManager,
        members: Vec<Arc<dyn Agent>>,
    ) -> Result<Self, OrchestrationError> {
        Self::new(MagenticPattern::new(manager), members)
    }
}

#[async_trait]
impl OrchestrationPattern for MagenticPattern {
    fn default_name(&self) -> &'static str {
        "MagenticOrchestration"
    }

    /// The manager picks speakers by description, so every member needs one
    fn validate(&self, members: &[Arc<dyn Agent>]) -> Result<(), OrchestrationError> {
        match members
            .iter()
            .find(|agent| agent.description().map_or(true, str::is_empty))
        {
            Some(agent) => Err(OrchestrationError::MissingDescription(agent.name().to_string())),
            None => Ok(()),
        }
    }

    fn prepare(&self, run: &RunContext) -> Result<(), OrchestrationError> {
        let topic = run.topic()?;

        for agent in run.members.iter() {
            let member = MemberState::new(agent.clone(), run);
            let topic = topic.clone();
            run.register(agent.name(), true, move |_id| {
                Ok(MagenticAgentActor::new(member.clone(), topic.clone()))
            })?;
        }

        let manager = self.manager.clone();
        let participants = participant_descriptions(&run.members);
        let completion = run.completion.clone();
        run.register(MANAGER_NAME, true, move |_id| {
            Ok(MagenticManagerActor::new(
                manager.clone(),
                participants.clone(),
                completion.clone(),
                topic.clone(),
            ))
        })?;
        Ok(())
    }

    async fn start(&self, task: ChatPayload, run: RunContext) -> Result<(), OrchestrationError> {
        let ChatPayload::Message(task) = task else {
            return Err(OrchestrationError::TypeError(
                "A Magentic task must be a single message".to_string(),
            ));
        };

        // No-op for members, which have no start handler
        try_join_all(run.members.iter().map(|agent| {
            run.send(MagenticStart { body: task.clone() }, agent.name())
        }))
        .await?;
        run.send(MagenticStart { body: task }, MANAGER_NAME).await
    }
}
