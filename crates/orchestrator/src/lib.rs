//! Multi-agent orchestration patterns
//!
//! An [`Orchestration`] coordinates a fixed set of [`llm::Agent`] members on
//! an [`runtime::InProcessRuntime`]. Every invocation registers its own actors
//! under a fresh internal topic and returns an [`OrchestrationResult`] that
//! settles exactly once.
//!
//! # Patterns
//!
//! - **Group chat**: a [`GroupChatManager`] picks the next speaker every turn
//! - **Magentic**: a planning [`MagenticManager`] keeps task and progress
//!   ledgers and re-plans when the team stalls
//! - **Sequential**: members form a pipeline
//! - **Concurrent**: members answer the same task in parallel
//!
//! # Usage
//!
//! ```ignore
//! let orchestration = GroupChatOrchestration::<ChatPayload, ChatMessage>::group_chat(
//!     RoundRobinGroupChatManager::new().with_max_rounds(4),
//!     vec![writer, reviewer],
//! )?;
//!
//! let runtime = InProcessRuntime::default();
//! runtime.start()?;
//! let result = orchestration.invoke(ChatPayload::from("Write a slogan"), &runtime).await?;
//! let answer = result.get(Some(Duration::from_secs(60))).await?;
//! runtime.stop_when_idle().await?;
//! ```

pub mod base;
pub mod concurrent;
pub mod error;
pub mod group_chat;
pub mod magentic;
pub mod payload;
pub mod result;
pub mod sequential;

pub use base::{CompletionHandle, Orchestration, OrchestrationPattern, ResponseCallback, RunContext};
pub use concurrent::{ConcurrentOrchestration, ConcurrentPattern};
pub use error::OrchestrationError;
pub use group_chat::{
    BooleanResult, GroupChatManager, GroupChatOrchestration, GroupChatPattern, MessageResult,
    ParticipantDescriptions, PromptedGroupChatManager, RoundRobinGroupChatManager, StringResult,
    TurnContext,
};
pub use magentic::{
    MagenticManager, MagenticOrchestration, MagenticPattern, ProgressLedger,
    StandardMagenticManager,
};
pub use payload::{default_input_transform, default_output_transform, ChatPayload};
pub use result::{OrchestrationResult, ResultState};
pub use sequential::{SequentialOrchestration, SequentialPattern};
