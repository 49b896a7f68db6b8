//! Concurrent orchestration
//!
//! The task is broadcast to every member at once; the result holds one
//! response per member in arrival order.

use async_trait::async_trait;
use llm::{Agent, ChatMessage};
use runtime::{
    dispatch, ActorError, AgentId, BaseActor, Handler, MessageContext, Payload, RoutedActor, Routes,
};
use std::sync::Arc;
use tracing::debug;

use crate::base::{CompletionHandle, MemberState, Orchestration, OrchestrationPattern, RunContext};
use crate::error::OrchestrationError;
use crate::payload::ChatPayload;

const COLLECTOR_NAME: &str = "CollectionActor";

#[derive(Debug, Clone)]
pub struct ConcurrentRequest {
    pub body: ChatPayload,
}

#[derive(Debug, Clone)]
pub struct ConcurrentResponse {
    pub body: ChatMessage,
}

pub type ConcurrentOrchestration<TIn = ChatPayload, TOut = ChatPayload> =
    Orchestration<ConcurrentPattern, TIn, TOut>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrentPattern;

impl<TIn, TOut> Orchestration<ConcurrentPattern, TIn, TOut>
where
    TIn: serde::Serialize + Send + 'static,
    TOut: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn concurrent(members: Vec<Arc<dyn Agent>>) -> Result<Self, OrchestrationError> {
        Self::new(ConcurrentPattern, members)
    }
}

struct ConcurrentAgentActor {
    routes: Arc<Routes<Self>>,
    member: MemberState,
    collector: AgentId,
}

impl RoutedActor for ConcurrentAgentActor {
    fn routes(&self) -> Arc<Routes<Self>> {
        self.routes.clone()
    }
}

#[async_trait]
impl BaseActor for ConcurrentAgentActor {
    fn description(&self) -> String {
        self.member.agent.description().unwrap_or_default().to_string()
    }

    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        dispatch(self, message, ctx).await
    }
}

#[async_trait]
impl Handler<ConcurrentRequest> for ConcurrentAgentActor {
    type Reply = ();

    async fn handle(&mut self, message: &ConcurrentRequest, ctx: &MessageContext) -> Result<(), ActorError> {
        if ctx.cancellation.is_cancelled() {
            return Ok(());
        }
        let response = self.member.respond(&message.body.messages()).await?;
        ctx.send(ConcurrentResponse { body: response }, self.collector.clone())
            .await?;
        Ok(())
    }
}

struct ConcurrentCollector {
    routes: Arc<Routes<Self>>,
    completion: CompletionHandle,
    expected: usize,
    responses: Vec<ChatMessage>,
}

impl RoutedActor for ConcurrentCollector {
    fn routes(&self) -> Arc<Routes<Self>> {
        self.routes.clone()
    }
}

#[async_trait]
impl BaseActor for ConcurrentCollector {
    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        dispatch(self, message, ctx).await
    }
}

#[async_trait]
impl Handler<ConcurrentResponse> for ConcurrentCollector {
    type Reply = ();

    async fn handle(&mut self, message: &ConcurrentResponse, _ctx: &MessageContext) -> Result<(), ActorError> {
        self.responses.push(message.body.clone());
        debug!(received = self.responses.len(), expected = self.expected, "Response collected");
        if self.responses.len() == self.expected {
            let responses = std::mem::take(&mut self.responses);
            self.completion.complete(ChatPayload::Messages(responses)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl OrchestrationPattern for ConcurrentPattern {
    fn default_name(&self) -> &'static str {
        "ConcurrentOrchestration"
    }

    fn prepare(&self, run: &RunContext) -> Result<(), OrchestrationError> {
        let completion = run.completion.clone();
        let expected = run.members.len();
        run.register(COLLECTOR_NAME, false, move |_id| {
            Ok(ConcurrentCollector {
                routes: Arc::new(Routes::new().message::<ConcurrentResponse>()),
                completion: completion.clone(),
                expected,
                responses: Vec::with_capacity(expected),
            })
        })?;

        let collector = run.actor_id(COLLECTOR_NAME)?;
        for agent in run.members.iter() {
            let member = MemberState::new(agent.clone(), run);
            let collector = collector.clone();
            run.register(agent.name(), true, move |_id| {
                Ok(ConcurrentAgentActor {
                    routes: Arc::new(Routes::new().event::<ConcurrentRequest>()),
                    member: member.clone(),
                    collector: collector.clone(),
                })
            })?;
        }
        Ok(())
    }

    async fn start(&self, task: ChatPayload, run: RunContext) -> Result<(), OrchestrationError> {
        run.publish(ConcurrentRequest { body: task }).await
    }
}
