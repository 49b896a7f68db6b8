//! Orchestration base
//!
//! An [`Orchestration`] owns a fixed set of members and a pattern. Each
//! [`invoke`](Orchestration::invoke) normalizes the task, lets the pattern
//! register its actors under a fresh internal topic, starts the pattern in the
//! background and returns a pending [`OrchestrationResult`].

use async_trait::async_trait;
use common::OperationTimer;
use futures::future::{BoxFuture, FutureExt};
use llm::{Agent, ChatMessage};
use parking_lot::Mutex;
use runtime::{AgentId, AgentType, InProcessRuntime, Payload, TopicId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::payload::{
    default_input_transform, default_output_transform, ChatPayload, InputTransform,
    OutputTransform,
};
use crate::result::OrchestrationResult;

/// Invoked with every member response
pub type ResponseCallback = Arc<dyn Fn(ChatMessage) -> BoxFuture<'static, ()> + Send + Sync>;

type Completion = Arc<dyn Fn(Result<ChatPayload, OrchestrationError>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Settles the result of one run
///
/// Applies the output transform on success. Only the first call has an effect.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Completion,
}

impl CompletionHandle {
    fn new(inner: Completion) -> Self {
        Self { inner }
    }

    pub async fn complete(&self, payload: ChatPayload) {
        (self.inner)(Ok(payload)).await
    }

    pub async fn fail(&self, error: OrchestrationError) {
        (self.inner)(Err(error)).await
    }
}

/// Everything a pattern needs for one run
#[derive(Clone)]
pub struct RunContext {
    pub runtime: InProcessRuntime,
    /// Fresh per invocation; scopes actor types and the broadcast topic
    pub internal_topic: String,
    pub members: Arc<[Arc<dyn Agent>]>,
    pub cancellation: CancellationToken,
    pub completion: CompletionHandle,
    pub response_callback: Option<ResponseCallback>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl RunContext {
    /// Broadcast topic shared by every actor of the run
    pub fn topic(&self) -> Result<TopicId, OrchestrationError> {
        TopicId::new(self.internal_topic.clone(), "default")
            .map_err(|e| OrchestrationError::Internal(e.to_string()))
    }

    /// `{name}_{internal_topic}`
    pub fn actor_type(&self, name: &str) -> String {
        format!("{}_{}", name, self.internal_topic)
    }

    pub fn actor_id(&self, name: &str) -> Result<AgentId, OrchestrationError> {
        AgentId::new(&self.actor_type(name), "default")
            .map_err(|e| OrchestrationError::Internal(e.to_string()))
    }

    /// Register `factory` under `{name}_{internal_topic}`, optionally
    /// subscribed to the run topic
    pub fn register<A, F>(&self, name: &str, subscribe: bool, factory: F) -> Result<AgentType, OrchestrationError>
    where
        A: runtime::BaseActor,
        F: Fn(&AgentId) -> anyhow::Result<A> + Send + Sync + 'static,
    {
        let agent_type = self.runtime.register_factory(&self.actor_type(name), factory)?;
        if subscribe {
            let subscription =
                runtime::Subscription::type_subscription(self.internal_topic.clone(), agent_type.clone())
                    .map_err(|e| OrchestrationError::Internal(e.to_string()))?;
            let id = subscription.id().to_string();
            self.runtime.add_subscription(subscription)?;
            self.subscriptions.lock().push(id);
        }
        Ok(agent_type)
    }

    /// Drop every subscription this run added. Publishes on the run topic
    /// reach nobody afterwards.
    pub fn release_subscriptions(&self) {
        let ids = std::mem::take(&mut *self.subscriptions.lock());
        for id in ids {
            if let Err(e) = self.runtime.remove_subscription(&id) {
                debug!(topic = %self.internal_topic, subscription_id = %id, error = %e, "Subscription already gone");
            }
        }
    }

    /// Point-to-point message carrying the run's cancellation token
    pub async fn send<M: Any + Send + Sync>(&self, message: M, name: &str) -> Result<(), OrchestrationError> {
        self.runtime
            .send_message(
                Payload::new(message),
                self.actor_id(name)?,
                None,
                Some(self.cancellation.clone()),
            )
            .await?;
        Ok(())
    }

    /// Broadcast on the run topic
    pub async fn publish<M: Any + Send + Sync>(&self, message: M) -> Result<(), OrchestrationError> {
        self.runtime
            .publish_message(Payload::new(message), self.topic()?, None, Some(self.cancellation.clone()))
            .await?;
        Ok(())
    }
}

/// How members are wired together and driven to a result
#[async_trait]
pub trait OrchestrationPattern: Send + Sync + 'static {
    /// Name used when the orchestration is not given one
    fn default_name(&self) -> &'static str;

    /// Pattern specific checks on the member list
    fn validate(&self, _members: &[Arc<dyn Agent>]) -> Result<(), OrchestrationError> {
        Ok(())
    }

    /// Register actors and subscriptions for one run
    fn prepare(&self, run: &RunContext) -> Result<(), OrchestrationError>;

    /// Deliver the task. Completion happens later through
    /// [`RunContext::completion`].
    async fn start(&self, task: ChatPayload, run: RunContext) -> Result<(), OrchestrationError>;
}

/// A pattern bound to its members and transforms
pub struct Orchestration<P, TIn = ChatPayload, TOut = ChatPayload> {
    pattern: Arc<P>,
    members: Arc<[Arc<dyn Agent>]>,
    name: String,
    description: Option<String>,
    input_transform: Option<InputTransform<TIn>>,
    output_transform: OutputTransform<TOut>,
    response_callback: Option<ResponseCallback>,
}

impl<P, TIn, TOut> std::fmt::Debug for Orchestration<P, TIn, TOut> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestration")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("members", &self.members.len())
            .finish_non_exhaustive()
    }
}

impl<P, TIn, TOut> Orchestration<P, TIn, TOut>
where
    P: OrchestrationPattern,
    TIn: Serialize + Send + 'static,
    TOut: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(pattern: P, members: Vec<Arc<dyn Agent>>) -> Result<Self, OrchestrationError> {
        validate_members(&members)?;
        pattern.validate(&members)?;

        Ok(Self {
            name: pattern.default_name().to_string(),
            pattern: Arc::new(pattern),
            members: members.into(),
            description: None,
            input_transform: None,
            output_transform: Arc::new(|payload: ChatPayload| {
                async move { default_output_transform::<TOut>(payload) }.boxed()
            }),
            response_callback: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_transform<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(TIn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ChatPayload, OrchestrationError>> + Send + 'static,
    {
        self.input_transform = Some(Arc::new(move |task: TIn| transform(task).boxed()));
        self
    }

    pub fn with_output_transform<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(ChatPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TOut, OrchestrationError>> + Send + 'static,
    {
        self.output_transform = Arc::new(move |payload: ChatPayload| transform(payload).boxed());
        self
    }

    pub fn with_agent_response_callback<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ChatMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.response_callback = Some(Arc::new(move |message: ChatMessage| callback(message).boxed()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn members(&self) -> &[Arc<dyn Agent>] {
        &self.members
    }

    pub fn pattern(&self) -> &P {
        &self.pattern
    }

    /// Start one run on `runtime`, which must be running for the run to make
    /// progress
    pub async fn invoke(
        &self,
        task: TIn,
        runtime: &InProcessRuntime,
    ) -> Result<OrchestrationResult<TOut>, OrchestrationError> {
        let task = match &self.input_transform {
            Some(transform) => transform(task).await?,
            None => default_input_transform(task)?,
        };

        let result = OrchestrationResult::new();
        let run = RunContext {
            runtime: runtime.clone(),
            internal_topic: Uuid::new_v4().simple().to_string(),
            members: self.members.clone(),
            cancellation: result.cancellation_token(),
            completion: self.completion_handle(&result),
            response_callback: self.response_callback.clone(),
            subscriptions: Arc::default(),
        };

        if let Err(e) = self.pattern.prepare(&run) {
            run.release_subscriptions();
            return Err(e);
        }
        info!(
            orchestration = %self.name,
            topic = %run.internal_topic,
            members = self.members.len(),
            "Orchestration invoked"
        );

        let settled = result.clone();
        let finished = run.clone();
        tokio::spawn(async move {
            settled.wait().await;
            finished.release_subscriptions();
        });

        let pattern = self.pattern.clone();
        let failed = result.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let timer = OperationTimer::new(format!("{}.start", name));
            let started = pattern.start(task, run).await;
            timer.finish_with_result(&started);
            if let Err(e) = started {
                error!(orchestration = %name, error = %e, "Orchestration failed to start");
                if let Err(settled) = failed.set_exception(e) {
                    debug!(orchestration = %name, reason = %settled, "Start error dropped");
                }
            }
        });

        Ok(result)
    }

    fn completion_handle(&self, result: &OrchestrationResult<TOut>) -> CompletionHandle {
        let result = result.clone();
        let transform = self.output_transform.clone();
        let name = self.name.clone();

        CompletionHandle::new(Arc::new(move |outcome: Result<ChatPayload, OrchestrationError>| {
            let result = result.clone();
            let transform = transform.clone();
            let name = name.clone();
            async move {
                let outcome = match outcome {
                    Ok(payload) => transform(payload).await,
                    Err(e) => Err(e),
                };
                let settled = match outcome {
                    Ok(value) => {
                        info!(orchestration = %name, "Orchestration completed");
                        result.set_result(value)
                    }
                    Err(e) => {
                        error!(orchestration = %name, error = %e, "Orchestration failed");
                        result.set_exception(e)
                    }
                };
                if let Err(e) = settled {
                    debug!(orchestration = %name, reason = %e, "Outcome dropped");
                }
            }
            .boxed()
        }))
    }
}

fn validate_members(members: &[Arc<dyn Agent>]) -> Result<(), OrchestrationError> {
    if members.is_empty() {
        return Err(OrchestrationError::EmptyMembers);
    }

    let mut seen = HashSet::new();
    for member in members {
        let name = member.name();
        // Member names become part of actor type names
        AgentType::new(format!("{}_x", name)).map_err(|e| OrchestrationError::InvalidMemberName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        if name.is_empty() {
            return Err(OrchestrationError::InvalidMemberName {
                name: String::new(),
                reason: "name must not be empty".to_string(),
            });
        }
        if !seen.insert(name) {
            return Err(OrchestrationError::DuplicateMember(name.to_string()));
        }
    }
    Ok(())
}

/// Shared state of every member actor
#[derive(Clone)]
pub(crate) struct MemberState {
    pub agent: Arc<dyn Agent>,
    pub completion: CompletionHandle,
    pub response_callback: Option<ResponseCallback>,
}

impl MemberState {
    pub fn new(agent: Arc<dyn Agent>, run: &RunContext) -> Self {
        Self {
            agent,
            completion: run.completion.clone(),
            response_callback: run.response_callback.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.agent.name()
    }

    /// Ask the agent for its next message. A failing agent fails the run.
    pub async fn respond(&self, messages: &[ChatMessage]) -> Result<ChatMessage, OrchestrationError> {
        debug!(agent = %self.name(), messages = messages.len(), "Invoking member");
        let response = match self.agent.get_response(messages).await {
            Ok(mut response) => {
                if response.name.is_none() {
                    response.name = Some(self.name().to_string());
                }
                response
            }
            Err(e) => {
                let error = OrchestrationError::Agent {
                    agent: self.name().to_string(),
                    reason: e.to_string(),
                };
                self.completion.fail(error.clone()).await;
                return Err(error);
            }
        };

        if let Some(callback) = &self.response_callback {
            callback(response.clone()).await;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::testing::EchoAgent;

    struct Noop;

    #[async_trait]
    impl OrchestrationPattern for Noop {
        fn default_name(&self) -> &'static str {
            "Noop"
        }

        fn prepare(&self, _run: &RunContext) -> Result<(), OrchestrationError> {
            Ok(())
        }

        async fn start(&self, task: ChatPayload, run: RunContext) -> Result<(), OrchestrationError> {
            run.completion.complete(task).await;
            Ok(())
        }
    }

    fn echo(name: &str) -> Arc<dyn Agent> {
        Arc::new(EchoAgent::new(name))
    }

    #[test]
    fn test_empty_members_rejected() {
        let err = Orchestration::<_, ChatPayload, ChatPayload>::new(Noop, vec![]).unwrap_err();
        assert_eq!(err, OrchestrationError::EmptyMembers);
    }

    #[test]
    fn test_duplicate_and_invalid_names_rejected() {
        let err = Orchestration::<_, ChatPayload, ChatPayload>::new(Noop, vec![echo("a"), echo("a")])
            .unwrap_err();
        assert_eq!(err, OrchestrationError::DuplicateMember("a".into()));

        let err = Orchestration::<_, ChatPayload, ChatPayload>::new(Noop, vec![echo("has space")])
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidMemberName { .. }));
    }

    #[tokio::test]
    async fn test_transforms_apply_around_the_run() {
        let orchestration = Orchestration::<_, u32, usize>::new(Noop, vec![echo("a")])
            .unwrap()
            .with_name("lengths")
            .with_input_transform(|n: u32| async move {
                Ok(ChatPayload::from(ChatMessage::user("x".repeat(n as usize))))
            })
            .with_output_transform(|payload: ChatPayload| async move {
                Ok(payload.messages()[0].content.len())
            });
        assert_eq!(orchestration.name(), "lengths");

        let runtime = InProcessRuntime::default();
        let result = orchestration.invoke(7, &runtime).await.unwrap();
        assert_eq!(result.get(Some(std::time::Duration::from_secs(1))).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_output_transform_error_fails_result() {
        let orchestration = Orchestration::<_, ChatPayload, u32>::new(Noop, vec![echo("a")]).unwrap();
        let runtime = InProcessRuntime::default();

        let result = orchestration.invoke(ChatPayload::from("not a number"), &runtime).await.unwrap();
        let err = result.get(Some(std::time::Duration::from_secs(1))).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Serialization(_)));
    }
}
