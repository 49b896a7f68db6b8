//! Base actor contract
//!
//! Actors own their state exclusively. The runtime wraps every instance in an
//! async mutex and feeds it from a single mailbox, so `handle_message` is never
//! entered concurrently for the same instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ActorError;
use crate::message::{MessageContext, Payload};

#[async_trait]
pub trait BaseActor: Send + 'static {
    /// Human readable description reported through agent metadata
    fn description(&self) -> String {
        String::new()
    }

    /// Handle one delivered message. Publish deliveries discard the reply.
    async fn handle_message(
        &mut self,
        message: Payload,
        ctx: &MessageContext,
    ) -> Result<Payload, ActorError>;

    async fn save_state(&mut self) -> Result<Value, ActorError> {
        Ok(Value::Object(Default::default()))
    }

    async fn load_state(&mut self, _state: Value) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called once when the runtime closes
    async fn close(&mut self) -> Result<(), ActorError> {
        Ok(())
    }
}

/// Identity and description of a live instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    #[serde(rename = "type")]
    pub agent_type: String,
    pub key: String,
    pub description: String,
}

/// Object-safe view of `Mutex<A>` used by mailboxes and the registry
#[async_trait]
pub(crate) trait ActorCell: Send + Sync {
    async fn handle(&self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError>;

    async fn description(&self) -> String;

    async fn save_state(&self) -> Result<Value, ActorError>;

    async fn load_state(&self, state: Value) -> Result<(), ActorError>;

    async fn close(&self) -> Result<(), ActorError>;
}

#[async_trait]
impl<A: BaseActor> ActorCell for Mutex<A> {
    async fn handle(&self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        self.lock().await.handle_message(message, ctx).await
    }

    async fn description(&self) -> String {
        self.lock().await.description()
    }

    async fn save_state(&self) -> Result<Value, ActorError> {
        self.lock().await.save_state().await
    }

    async fn load_state(&self, state: Value) -> Result<(), ActorError> {
        self.lock().await.load_state(state).await
    }

    async fn close(&self) -> Result<(), ActorError> {
        self.lock().await.close().await
    }
}
