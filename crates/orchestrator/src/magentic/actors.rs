use async_trait::async_trait;
use llm::{AuthorRole, ChatHistory, ChatMessage};
use runtime::{
    dispatch, ActorError, BaseActor, Handler, MessageContext, Payload, RoutedActor, Routes, TopicId,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::manager::MagenticManager;
use super::{MagenticRequest, MagenticReset, MagenticResponse, MagenticStart, MANAGER_NAME};
use crate::base::{CompletionHandle, MemberState};
use crate::error::OrchestrationError;
use crate::group_chat::ParticipantDescriptions;
use crate::payload::ChatPayload;

/// Hand-off marker added before another participant's message
fn transferred_to(name: &str) -> ChatMessage {
    ChatMessage::user(format!("Transferred to {}", name))
}

pub(crate) struct MagenticAgentActor {
    routes: Arc<Routes<Self>>,
    member: MemberState,
    history: ChatHistory,
    topic: TopicId,
}

impl MagenticAgentActor {
    pub fn new(member: MemberState, topic: TopicId) -> Self {
        Self {
            routes: Arc::new(
                Routes::new()
                    .event::<MagenticResponse>()
                    .event::<MagenticRequest>()
                    .event::<MagenticReset>(),
            ),
            member,
            history: ChatHistory::new(),
            topic,
        }
    }
}

impl RoutedActor for MagenticAgentActor {
    fn routes(&self) -> Arc<Routes<Self>> {
        self.routes.clone()
    }
}

#[async_trait]
impl BaseActor for MagenticAgentActor {
    fn description(&self) -> String {
        self.member.agent.description().unwrap_or_default().to_string()
    }

    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        dispatch(self, message, ctx).await
    }
}

#[async_trait]
impl Handler<MagenticResponse> for MagenticAgentActor {
    type Reply = ();

    async fn handle(&mut self, message: &MagenticResponse, _ctx: &MessageContext) -> Result<(), ActorError> {
        if message.body.role != AuthorRole::User {
            let author = message.body.name.as_deref().unwrap_or("unknown");
            self.history.add_message(transferred_to(author));
        }
        self.history.add_message(message.body.clone());
        Ok(())
    }
}

#[async_trait]
impl Handler<MagenticRequest> for MagenticAgentActor {
    type Reply = ();

    async fn handle(&mut self, message: &MagenticRequest, ctx: &MessageContext) -> Result<(), ActorError> {
        if message.agent_name != self.member.name() || ctx.cancellation.is_cancelled() {
            return Ok(());
        }

        let name = self.member.name().to_string();
        self.history.add_user(format!(
            "Transferred to {}, adopt the persona immediately.",
            name
        ));
        let response = self.member.respond(self.history.messages()).await?;
        self.history.add_message(response.clone());
        ctx.publish(MagenticResponse { body: response }, self.topic.clone())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Handler<MagenticReset> for MagenticAgentActor {
    type Reply = ();

    async fn handle(&mut self, _message: &MagenticReset, _ctx: &MessageContext) -> Result<(), ActorError> {
        self.history.clear();
        Ok(())
    }
}

enum InnerStep {
    /// Waiting on a participant, or finished
    Yielded,
    Reset,
}

/// Runs the outer (planning) and inner (progress) loops
pub(crate) struct MagenticManagerActor {
    routes: Arc<Routes<Self>>,
    manager: Arc<dyn MagenticManager>,
    participants: ParticipantDescriptions,
    completion: CompletionHandle,
    topic: TopicId,
    history: ChatHistory,
    task: Option<ChatMessage>,
    facts: Option<ChatMessage>,
    plan: Option<ChatMessage>,
    round_count: usize,
    stall_count: usize,
    reset_count: usize,
}

impl MagenticManagerActor {
    pub fn new(
        manager: Arc<dyn MagenticManager>,
        participants: ParticipantDescriptions,
        completion: CompletionHandle,
        topic: TopicId,
    ) -> Self {
        Self {
            routes: Arc::new(
                Routes::new()
                    .message::<MagenticStart>()
                    .event::<MagenticResponse>(),
            ),
            manager,
            participants,
            completion,
            topic,
            history: ChatHistory::new(),
            task: None,
            facts: None,
            plan: None,
            round_count: 0,
            stall_count: 0,
            reset_count: 0,
        }
    }

    fn task(&self) -> Result<ChatMessage, OrchestrationError> {
        self.task
            .clone()
            .ok_or_else(|| OrchestrationError::Internal("Magentic run has no task".to_string()))
    }

    /// Fail the run with any error of `step`
    async fn guard(&mut self, step: Result<(), OrchestrationError>) -> Result<(), ActorError> {
        if let Err(e) = step {
            warn!(topic = %self.topic, error = %e, "Magentic run failed");
            self.completion.fail(e.clone()).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn start_run(&mut self, task: ChatMessage, ctx: &MessageContext) -> Result<(), OrchestrationError> {
        self.task = Some(task.clone());
        let (facts, plan) = self
            .manager
            .create_facts_and_plan(&self.history, &task, &self.participants, None)
            .await?;
        self.facts = Some(facts);
        self.plan = Some(plan);
        self.run_outer_loop(ctx).await
    }

    async fn run_outer_loop(&mut self, ctx: &MessageContext) -> Result<(), OrchestrationError> {
        loop {
            if ctx.cancellation.is_cancelled() {
                return Ok(());
            }
            let task = self.task()?;
            let (Some(facts), Some(plan)) = (&self.facts, &self.plan) else {
                return Err(OrchestrationError::Internal("task ledger missing".to_string()));
            };
            let ledger = self
                .manager
                .create_task_ledger(&task, facts, plan, &self.participants)
                .await?;
            let ledger = ChatMessage::assistant(ledger).with_name(MANAGER_NAME);
            self.history.add_message(ledger.clone());
            ctx.publish(MagenticResponse { body: ledger }, self.topic.clone())
                .await?;

            match self.run_inner_loop(ctx).await? {
                InnerStep::Reset => continue,
                InnerStep::Yielded => return Ok(()),
            }
        }
    }

    async fn run_inner_loop(&mut self, ctx: &MessageContext) -> Result<InnerStep, OrchestrationError> {
        if ctx.cancellation.is_cancelled() {
            debug!(topic = %self.topic, "Magentic run cancelled; skipping round");
            return Ok(InnerStep::Yielded);
        }

        let task = self.task()?;
        self.round_count += 1;
        if let Some(max) = self.manager.max_round_count() {
            if self.round_count > max {
                info!(rounds = max, "Maximum round count reached");
                self.finish(&task).await?;
                return Ok(InnerStep::Yielded);
            }
        }

        let ledger = self
            .manager
            .create_progress_ledger(&self.history, &task, &self.participants)
            .await?;
        debug!(
            round = self.round_count,
            satisfied = ledger.is_request_satisfied.answer,
            next = %ledger.next_speaker.answer,
            "Progress ledger"
        );

        if ledger.is_request_satisfied.answer {
            self.finish(&task).await?;
            return Ok(InnerStep::Yielded);
        }

        if !ledger.is_progress_being_made.answer || ledger.is_in_loop.answer {
            self.stall_count += 1;
        } else {
            self.stall_count = self.stall_count.saturating_sub(1);
        }

        if self.stall_count > self.manager.max_stall_count() {
            self.reset_count += 1;
            if let Some(max) = self.manager.max_reset_count() {
                if self.reset_count > max {
                    info!(resets = max, "Maximum reset count reached");
                    self.finish(&task).await?;
                    return Ok(InnerStep::Yielded);
                }
            }
            info!(stalls = self.stall_count, resets = self.reset_count, "Stalled; resetting plan");
            self.reset(&task, ctx).await?;
            return Ok(InnerStep::Reset);
        }

        let instruction = ChatMessage::assistant(ledger.instruction_or_question.answer).with_name(MANAGER_NAME);
        self.history.add_message(instruction.clone());
        ctx.publish(MagenticResponse { body: instruction }, self.topic.clone())
            .await?;

        let next = ledger.next_speaker.answer;
        if !self.participants.contains(&next) {
            return Err(OrchestrationError::UnknownParticipant(next));
        }
        ctx.publish(MagenticRequest { agent_name: next }, self.topic.clone())
            .await?;
        Ok(InnerStep::Yielded)
    }

    async fn reset(&mut self, task: &ChatMessage, ctx: &MessageContext) -> Result<(), OrchestrationError> {
        let (facts, plan) = self
            .manager
            .create_facts_and_plan(&self.history, task, &self.participants, self.facts.as_ref())
            .await?;
        self.facts = Some(facts);
        self.plan = Some(plan);

        ctx.publish(MagenticReset, self.topic.clone()).await?;
        self.history.clear();
        self.stall_count = 0;
        Ok(())
    }

    async fn finish(&mut self, task: &ChatMessage) -> Result<(), OrchestrationError> {
        let answer = self.manager.prepare_final_answer(&self.history, task).await?;
        info!(topic = %self.topic, rounds = self.round_count, "Magentic run finished");
        self.completion.complete(ChatPayload::Message(answer)).await;
        Ok(())
    }
}

impl RoutedActor for MagenticManagerActor {
    fn routes(&self) -> Arc<Routes<Self>> {
        self.routes.clone()
    }
}

#[async_trait]
impl BaseActor for MagenticManagerActor {
    fn description(&self) -> String {
        "Magentic manager".to_string()
    }

    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        dispatch(self, message, ctx).await
    }
}

#[async_trait]
impl Handler<MagenticStart> for MagenticManagerActor {
    type Reply = ();

    async fn handle(&mut self, message: &MagenticStart, ctx: &MessageContext) -> Result<(), ActorError> {
        let step = self.start_run(message.body.clone(), ctx).await;
        self.guard(step).await
    }
}

#[async_trait]
impl Handler<MagenticResponse> for MagenticManagerActor {
    type Reply = ();

    async fn handle(&mut self, message: &MagenticResponse, ctx: &MessageContext) -> Result<(), ActorError> {
        if message.body.role != AuthorRole::User {
            let author = message.body.name.as_deref().unwrap_or("unknown");
            self.history.add_message(transferred_to(author));
        }
        self.history.add_message(message.body.clone());

        let step = match self.run_inner_loop(ctx).await {
            Ok(InnerStep::Reset) => self.run_outer_loop(ctx).await,
            Ok(InnerStep::Yielded) => Ok(()),
            Err(e) => Err(e),
        };
        self.guard(step).await
    }
}
