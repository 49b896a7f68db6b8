//! In-process actor runtime
//!
//! Agents are addressed by [`AgentId`] `(type, key)` and created lazily from a
//! per-type factory on first delivery. Messages reach them either point to
//! point ([`InProcessRuntime::send_message`]) or through topics
//! ([`InProcessRuntime::publish_message`]) matched by [`Subscription`] rules.
//! Each instance handles one message at a time, in arrival order.
//!
//! ```ignore
//! let runtime = InProcessRuntime::default();
//! let agent_type = runtime.register_factory("loopback", |_id| Ok(Loopback::default()))?;
//! runtime.add_subscription(Subscription::default_for(agent_type.clone()))?;
//!
//! runtime.start()?;
//! runtime.publish_message(Payload::new(Ping), TopicId::default_topic(), None, None).await?;
//! runtime.stop_when_idle().await?;
//! ```

pub mod actor;
pub mod config;
pub mod error;
pub mod ids;
mod mailbox;
pub mod message;
pub mod routed;
pub mod runtime;
pub mod subscription;

pub use actor::{AgentMetadata, BaseActor};
pub use config::RuntimeConfig;
pub use error::{ActorError, IdError, RuntimeError};
pub use ids::{AgentId, AgentType, TopicId};
pub use message::{MessageContext, Payload};
pub use routed::{dispatch, DispatchFn, Handler, RoutedActor, Routes};
pub use runtime::InProcessRuntime;
pub use subscription::{Subscription, SubscriptionRule};

// Re-exported so downstream handlers share the same token type
pub use tokio_util::sync::CancellationToken;
