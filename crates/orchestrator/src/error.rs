use llm::{PromptError, ServiceError};
use runtime::{ActorError, RuntimeError};
use std::time::Duration;
use thiserror::Error;

/// Orchestration errors
///
/// `Clone` so that a failed [`OrchestrationResult`](crate::OrchestrationResult)
/// can hand the same error to every reader.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestrationError {
    #[error("An orchestration requires at least one member")]
    EmptyMembers,

    #[error("Duplicate member name: {0}")]
    DuplicateMember(String),

    #[error("Invalid member name {name:?}: {reason}")]
    InvalidMemberName { name: String, reason: String },

    #[error("Member {0} has no description")]
    MissingDescription(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Agent {agent} failed: {reason}")]
    Agent { agent: String, reason: String },

    #[error("Chat completion failed: {0}")]
    Service(String),

    #[error("Malformed structured output: {0}")]
    StructuredOutput(String),

    #[error("Prompt rendering failed: {0}")]
    Prompt(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("The orchestration was canceled before completion")]
    Cancelled,

    #[error("The orchestration has already been canceled")]
    AlreadyCancelled,

    #[error("The orchestration has already completed")]
    AlreadyCompleted,

    #[error("Timed out after {0:?} waiting for the orchestration result")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for OrchestrationError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::StructuredOutput { .. } => {
                OrchestrationError::StructuredOutput(error.to_string())
            }
            other => OrchestrationError::Service(other.to_string()),
        }
    }
}

impl From<PromptError> for OrchestrationError {
    fn from(error: PromptError) -> Self {
        OrchestrationError::Prompt(error.to_string())
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(error: serde_json::Error) -> Self {
        OrchestrationError::Serialization(error.to_string())
    }
}

impl From<RuntimeError> for OrchestrationError {
    /// Recovers an orchestration error raised inside a handler; anything else
    /// is reported as a runtime failure.
    fn from(error: RuntimeError) -> Self {
        if let RuntimeError::Handler {
            source: ActorError::Other(inner),
            ..
        } = &error
        {
            if let Some(original) = inner.downcast_ref::<OrchestrationError>() {
                return original.clone();
            }
        }
        match error {
            RuntimeError::Cancelled => OrchestrationError::Cancelled,
            other => OrchestrationError::Runtime(other.to_string()),
        }
    }
}

impl From<OrchestrationError> for ActorError {
    fn from(error: OrchestrationError) -> Self {
        ActorError::Other(anyhow::Error::new(error))
    }
}
