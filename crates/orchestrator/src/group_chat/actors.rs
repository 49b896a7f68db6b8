use async_trait::async_trait;
use llm::ChatHistory;
use runtime::{
    dispatch, ActorError, BaseActor, Handler, MessageContext, Payload, RoutedActor, Routes, TopicId,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::manager::{GroupChatManager, ParticipantDescriptions, TurnContext};
use super::{GroupChatRequest, GroupChatResponse, GroupChatStart, HumanResponseFn};
use crate::base::{CompletionHandle, MemberState};
use crate::error::OrchestrationError;
use crate::payload::ChatPayload;

/// Wraps one member. Keeps its own copy of the conversation and speaks only
/// when its name is requested.
pub(crate) struct GroupChatAgentActor {
    routes: Arc<Routes<Self>>,
    member: MemberState,
    history: ChatHistory,
    topic: TopicId,
}

impl GroupChatAgentActor {
    pub fn new(member: MemberState, topic: TopicId) -> Self {
        Self {
            routes: Arc::new(
                Routes::new()
                    .message::<GroupChatStart>()
                    .event::<GroupChatResponse>()
                    .event::<GroupChatRequest>(),
            ),
            member,
            history: ChatHistory::new(),
            topic,
        }
    }
}

impl RoutedActor for GroupChatAgentActor {
    fn routes(&self) -> Arc<Routes<Self>> {
        self.routes.clone()
    }
}

#[async_trait]
impl BaseActor for GroupChatAgentActor {
    fn description(&self) -> String {
        self.member.agent.description().unwrap_or_default().to_string()
    }

    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        dispatch(self, message, ctx).await
    }
}

#[async_trait]
impl Handler<GroupChatStart> for GroupChatAgentActor {
    type Reply = ();

    async fn handle(&mut self, message: &GroupChatStart, _ctx: &MessageContext) -> Result<(), ActorError> {
        self.history.extend(message.body.messages());
        Ok(())
    }
}

#[async_trait]
impl Handler<GroupChatResponse> for GroupChatAgentActor {
    type Reply = ();

    async fn handle(&mut self, message: &GroupChatResponse, _ctx: &MessageContext) -> Result<(), ActorError> {
        self.history.add_message(message.body.clone());
        Ok(())
    }
}

#[async_trait]
impl Handler<GroupChatRequest> for GroupChatAgentActor {
    type Reply = ();

    async fn handle(&mut self, message: &GroupChatRequest, ctx: &MessageContext) -> Result<(), ActorError> {
        if message.agent_name != self.member.name() || ctx.cancellation.is_cancelled() {
            return Ok(());
        }

        let response = self.member.respond(self.history.messages()).await?;
        self.history.add_message(response.clone());
        ctx.publish(GroupChatResponse { body: response }, self.topic.clone())
            .await?;
        Ok(())
    }
}

/// Drives the conversation: one manager decision per turn
pub(crate) struct GroupChatManagerActor {
    routes: Arc<Routes<Self>>,
    manager: Arc<dyn GroupChatManager>,
    participants: ParticipantDescriptions,
    human_response: Option<HumanResponseFn>,
    completion: CompletionHandle,
    topic: TopicId,
    history: ChatHistory,
    round: usize,
}

impl GroupChatManagerActor {
    pub fn new(
        manager: Arc<dyn GroupChatManager>,
        participants: ParticipantDescriptions,
        human_response: Option<HumanResponseFn>,
        completion: CompletionHandle,
        topic: TopicId,
    ) -> Self {
        Self {
            routes: Arc::new(
                Routes::new()
                    .message::<GroupChatStart>()
                    .event::<GroupChatResponse>(),
            ),
            manager,
            participants,
            human_response,
            completion,
            topic,
            history: ChatHistory::new(),
            round: 0,
        }
    }

    fn turn(&self) -> TurnContext<'_> {
        TurnContext {
            history: &self.history,
            round: self.round,
            participants: &self.participants,
        }
    }

    async fn run_turn(&mut self, ctx: &MessageContext) -> Result<(), ActorError> {
        if let Err(e) = self.take_turn(ctx).await {
            warn!(topic = %self.topic, error = %e, "Group chat failed");
            self.completion.fail(e.clone()).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn take_turn(&mut self, ctx: &MessageContext) -> Result<(), OrchestrationError> {
        if ctx.cancellation.is_cancelled() {
            debug!(topic = %self.topic, "Group chat cancelled; skipping turn");
            return Ok(());
        }

        let ask_user = self.manager.should_request_user_input(self.turn()).await?;
        if ask_user.result {
            if let Some(human) = &self.human_response {
                debug!(reason = %ask_user.reason, "Requesting user input");
                let input = human(self.history.clone()).await?;
                self.history.add_message(input.clone());
                ctx.publish(GroupChatResponse { body: input }, self.topic.clone())
                    .await?;
            }
        }

        if ctx.cancellation.is_cancelled() {
            return Ok(());
        }
        let terminate = self.manager.should_terminate(self.turn()).await?;
        if terminate.result {
            let filtered = self.manager.filter_results(self.turn()).await?;
            info!(
                topic = %self.topic,
                rounds = self.round,
                reason = %terminate.reason,
                "Group chat finished"
            );
            self.completion.complete(ChatPayload::Message(filtered.result)).await;
            return Ok(());
        }

        if ctx.cancellation.is_cancelled() {
            return Ok(());
        }
        let next = self.manager.select_next_agent(self.turn()).await?;
        if !self.participants.contains(&next.result) {
            return Err(OrchestrationError::UnknownParticipant(next.result));
        }

        self.round += 1;
        debug!(round = self.round, next = %next.result, reason = %next.reason, "Next speaker selected");
        ctx.publish(
            GroupChatRequest {
                agent_name: next.result,
            },
            self.topic.clone(),
        )
        .await?;
        Ok(())
    }
}

impl RoutedActor for GroupChatManagerActor {
    fn routes(&self) -> Arc<Routes<Self>> {
        self.routes.clone()
    }
}

#[async_trait]
impl BaseActor for GroupChatManagerActor {
    fn description(&self) -> String {
        "Group chat manager".to_string()
    }

    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        dispatch(self, message, ctx).await
    }
}

#[async_trait]
impl Handler<GroupChatStart> for GroupChatManagerActor {
    type Reply = ();

    async fn handle(&mut self, message: &GroupChatStart, ctx: &MessageContext) -> Result<(), ActorError> {
        self.history.extend(message.body.messages());
        self.run_turn(ctx).await
    }
}

#[async_trait]
impl Handler<GroupChatResponse> for GroupChatManagerActor {
    type Reply = ();

    async fn handle(&mut self, message: &GroupChatResponse, ctx: &MessageContext) -> Result<(), ActorError> {
        self.history.add_message(message.body.clone());
        self.run_turn(ctx).await
    }
}

