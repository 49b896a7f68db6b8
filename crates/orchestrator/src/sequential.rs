//! Sequential orchestration
//!
//! Members form a pipeline in declaration order. Each member answers the
//! previous member's output; the last answer is the result.

use async_trait::async_trait;
use llm::Agent;
use runtime::{
    dispatch, ActorError, AgentId, BaseActor, Handler, MessageContext, Payload, RoutedActor, Routes,
};
use std::sync::Arc;
use tracing::debug;

use crate::base::{CompletionHandle, MemberState, Orchestration, OrchestrationPattern, RunContext};
use crate::error::OrchestrationError;
use crate::payload::ChatPayload;

const COLLECTOR_NAME: &str = "CollectionActor";

/// Input for the next stage of the pipeline
#[derive(Debug, Clone)]
pub struct SequentialRequest {
    pub body: ChatPayload,
}

/// Output of the last stage
#[derive(Debug, Clone)]
pub struct SequentialResult {
    pub body: ChatPayload,
}

pub type SequentialOrchestration<TIn = ChatPayload, TOut = ChatPayload> =
    Orchestration<SequentialPattern, TIn, TOut>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialPattern;

impl<TIn, TOut> Orchestration<SequentialPattern, TIn, TOut>
where
    TIn: serde::Serialize + Send + 'static,
    TOut: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn sequential(members: Vec<Arc<dyn Agent>>) -> Result<Self, OrchestrationError> {
        Self::new(SequentialPattern, members)
    }
}

#[derive(Clone)]
enum NextStage {
    Member(AgentId),
    Collector(AgentId),
}

struct SequentialAgentActor {
    routes: Arc<Routes<Self>>,
    member: MemberState,
    next: NextStage,
}

impl RoutedActor for SequentialAgentActor {
    fn routes(&self) -> Arc<Routes<Self>> {
        self.routes.clone()
    }
}

#[async_trait]
impl BaseActor for SequentialAgentActor {
    fn description(&self) -> String {
        self.member.agent.description().unwrap_or_default().to_string()
    }

    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        dispatch(self, message, ctx).await
    }
}

#[async_trait]
impl Handler<SequentialRequest> for SequentialAgentActor {
    type Reply = ();

    async fn handle(&mut self, message: &SequentialRequest, ctx: &MessageContext) -> Result<(), ActorError> {
        if ctx.cancellation.is_cancelled() {
            return Ok(());
        }
        let response = self.member.respond(&message.body.messages()).await?;
        debug!(agent = %self.member.name(), "Stage finished");

        let body = ChatPayload::Message(response);
        match &self.next {
            NextStage::Member(next) => ctx.send(SequentialRequest { body }, next.clone()).await?,
            NextStage::Collector(collector) => ctx.send(SequentialResult { body }, collector.clone()).await?,
        };
        Ok(())
    }
}

struct SequentialCollector {
    routes: Arc<Routes<Self>>,
    completion: CompletionHandle,
}

impl RoutedActor for SequentialCollector {
    fn routes(&self) -> Arc<Routes<Self>> {
        self.routes.clone()
    }
}

#[async_trait]
impl BaseActor for SequentialCollector {
    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        dispatch(self, message, ctx).await
    }
}

#[async_trait]
impl Handler<SequentialResult> for SequentialCollector {
    type Reply = ();

    async fn handle(&mut self, message: &SequentialResult, _ctx: &MessageContext) -> Result<(), ActorError> {
        self.completion.complete(message.body.clone()).await;
        Ok(())
    }
}

#[async_trait]
impl OrchestrationPattern for SequentialPattern {
    fn default_name(&self) -> &'static str {
        "SequentialOrchestration"
    }

    fn prepare(&self, run: &RunContext) -> Result<(), OrchestrationError> {
        let completion = run.completion.clone();
        run.register(COLLECTOR_NAME, false, move |_id| {
            Ok(SequentialCollector {
                routes: Arc::new(Routes::new().message::<SequentialResult>()),
                completion: completion.clone(),
            })
        })?;

        for (index, agent) in run.members.iter().enumerate() {
            let next = match run.members.get(index + 1) {
                Some(next) => NextStage::Member(run.actor_id(next.name())?),
                None => NextStage::Collector(run.actor_id(COLLECTOR_NAME)?),
            };
            let member = MemberState::new(agent.clone(), run);
            run.register(agent.name(), false, move |_id| {
                Ok(SequentialAgentActor {
                    routes: Arc::new(Routes::new().message::<SequentialRequest>()),
                    member: member.clone(),
                    next: next.clone(),
                })
            })?;
        }
        Ok(())
    }

    async fn start(&self, task: ChatPayload, run: RunContext) -> Result<(), OrchestrationError> {
        let first = run
            .members
            .first()
            .ok_or(OrchestrationError::EmptyMembers)?
            .name()
            .to_string();
        run.send(SequentialRequest { body: task }, &first).await
    }
}
