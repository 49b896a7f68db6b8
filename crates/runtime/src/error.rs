use thiserror::Error;

use crate::ids::AgentId;

/// Identifier validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Identifier must not be empty")]
    Empty,

    #[error("Invalid character {ch:?} in {value:?}")]
    InvalidCharacter { value: String, ch: char },

    #[error("Expected `type/key`, got {0:?}")]
    MissingSeparator(String),
}

/// Errors raised by actor handlers
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Message {type_name} is not handled by {agent}")]
    UnexpectedMessage {
        agent: AgentId,
        type_name: &'static str,
    },

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Runtime call failed: {0}")]
    Runtime(Box<RuntimeError>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RuntimeError> for ActorError {
    fn from(error: RuntimeError) -> Self {
        ActorError::Runtime(Box::new(error))
    }
}

impl From<serde_json::Error> for ActorError {
    fn from(error: serde_json::Error) -> Self {
        ActorError::State(error.to_string())
    }
}

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Agent type {0} is already registered")]
    AgentTypeAlreadyRegistered(String),

    #[error("Agent type {0} is not registered")]
    UnknownAgentType(String),

    #[error("Subscription {0} already exists")]
    SubscriptionAlreadyExists(String),

    #[error("Subscription {0} not found")]
    SubscriptionNotFound(String),

    #[error("Agent {agent} is not of type {expected}")]
    TypeMismatch {
        agent: AgentId,
        expected: &'static str,
    },

    #[error("Failed to construct agent {agent}: {reason}")]
    Construction { agent: AgentId, reason: String },

    #[error("Handler of {agent} failed: {source}")]
    Handler {
        agent: AgentId,
        #[source]
        source: ActorError,
    },

    #[error("Expected reply of type {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Message to {0} was abandoned before delivery")]
    DeliveryAbandoned(AgentId),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Runtime is already running")]
    AlreadyRunning,

    #[error("Runtime is not running")]
    NotRunning,

    #[error("Runtime is closed")]
    Closed,

    #[error("Invalid state snapshot: {0}")]
    State(String),

    #[error(transparent)]
    InvalidId(#[from] IdError),

    #[error("Internal runtime error: {0}")]
    Internal(String),
}
