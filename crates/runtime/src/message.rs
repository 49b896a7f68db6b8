//! Payloads and per-delivery context

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::ids::{AgentId, TopicId};
use crate::runtime::InProcessRuntime;
use crate::subscription::Subscription;

/// Type-erased message value. Cloning shares the underlying value.
#[derive(Clone)]
pub struct Payload {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Payload {
    pub fn new<M: Any + Send + Sync>(value: M) -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
            value: Arc::new(value),
        }
    }

    /// `()`, the reply of event handlers and unmatched messages
    pub fn unit() -> Self {
        Self::new(())
    }

    pub fn is<M: Any>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }

    pub fn is_unit(&self) -> bool {
        self.is::<()>()
    }

    pub fn downcast_ref<M: Any>(&self) -> Option<&M> {
        self.value.downcast_ref::<M>()
    }

    pub fn downcast<M: Any + Send + Sync>(self) -> Result<Arc<M>, Self> {
        let Payload {
            type_id,
            type_name,
            value,
        } = self;
        value.downcast::<M>().map_err(|value| Payload {
            type_id,
            type_name,
            value,
        })
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.type_name).finish()
    }
}

/// Delivery metadata handed to every handler invocation
#[derive(Clone)]
pub struct MessageContext {
    pub recipient: AgentId,
    pub sender: Option<AgentId>,
    /// Set when delivered through a publish
    pub topic: Option<TopicId>,
    pub is_rpc: bool,
    pub message_id: String,
    /// Subscriptions that matched the topic at delivery time
    pub subscriptions: Vec<Subscription>,
    pub cancellation: CancellationToken,
    runtime: InProcessRuntime,
}

impl MessageContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        recipient: AgentId,
        sender: Option<AgentId>,
        topic: Option<TopicId>,
        message_id: String,
        subscriptions: Vec<Subscription>,
        cancellation: CancellationToken,
        runtime: InProcessRuntime,
    ) -> Self {
        Self {
            is_rpc: topic.is_none(),
            recipient,
            sender,
            topic,
            message_id,
            subscriptions,
            cancellation,
            runtime,
        }
    }

    pub fn runtime(&self) -> &InProcessRuntime {
        &self.runtime
    }

    /// Publish as the recipient, sharing this delivery's cancellation token
    pub async fn publish<M: Any + Send + Sync>(
        &self,
        message: M,
        topic: TopicId,
    ) -> Result<(), RuntimeError> {
        self.runtime
            .publish_message(
                Payload::new(message),
                topic,
                Some(self.recipient.clone()),
                Some(self.cancellation.clone()),
            )
            .await
    }

    /// Send as the recipient. Sending to the recipient itself never resolves.
    pub async fn send<M: Any + Send + Sync>(
        &self,
        message: M,
        recipient: AgentId,
    ) -> Result<Payload, RuntimeError> {
        self.runtime
            .send_message(
                Payload::new(message),
                recipient,
                Some(self.recipient.clone()),
                Some(self.cancellation.clone()),
            )
            .await
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("recipient", &self.recipient)
            .field("sender", &self.sender)
            .field("topic", &self.topic)
            .field("is_rpc", &self.is_rpc)
            .field("message_id", &self.message_id)
            .finish()
    }
}
