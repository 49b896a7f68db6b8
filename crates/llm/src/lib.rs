//! Chat model, completion service contract, prompt rendering and agents
//!
//! Providers are not implemented here. Anything that can answer a
//! [`ChatHistory`] implements [`ChatCompletionService`]; orchestration members
//! implement [`Agent`].
//!
//! ```ignore
//! let agent = ChatCompletionAgent::new("writer", service)
//!     .with_description("Drafts short copy")
//!     .with_instructions("Answer in one paragraph.");
//! let reply = agent.get_response(&[ChatMessage::user("Pitch a slogan")]).await?;
//! ```

pub mod agent;
pub mod message;
pub mod prompt;
pub mod service;
pub mod settings;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{Agent, AgentError, ChatCompletionAgent};
pub use message::{AuthorRole, ChatHistory, ChatMessage, MessageDelta};
pub use prompt::{PromptError, PromptRenderer, TeraRenderer};
pub use service::{
    collect_stream, get_structured_response, parse_structured, ChatCompletionService,
    ServiceError,
};
pub use settings::{ExecutionSettings, ResponseFormat};
