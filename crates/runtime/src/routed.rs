//! Typed handler dispatch
//!
//! An actor declares its handlers once, in its constructor, as a [`Routes`]
//! table keyed by payload type. [`dispatch`] picks the first entry whose type
//! equals the runtime type of the message and whose delivery mode and topic
//! filter accept it.
//!
//! ```ignore
//! struct Counter { routes: Arc<Routes<Self>>, count: usize }
//!
//! impl Counter {
//!     fn new() -> Self {
//!         Self { routes: Arc::new(Routes::new().event::<Tick>().rpc::<GetCount>()), count: 0 }
//!     }
//! }
//!
//! #[async_trait]
//! impl Handler<Tick> for Counter {
//!     type Reply = ();
//!     async fn handle(&mut self, _: &Tick, _: &MessageContext) -> Result<(), ActorError> {
//!         self.count += 1;
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::TypeId;
use std::sync::Arc;
use tracing::debug;

use crate::error::ActorError;
use crate::message::{MessageContext, Payload};

/// Handler for one payload type
#[async_trait]
pub trait Handler<M: Send + Sync + 'static>: Send {
    type Reply: Send + Sync + 'static;

    async fn handle(&mut self, message: &M, ctx: &MessageContext) -> Result<Self::Reply, ActorError>;
}

pub type DispatchFn<A> = for<'a> fn(
    &'a mut A,
    &'a Payload,
    &'a MessageContext,
) -> BoxFuture<'a, Result<Payload, ActorError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Publish deliveries only; reply discarded
    Event,
    /// Send deliveries only
    Rpc,
    Both,
}

impl Mode {
    fn accepts(self, is_rpc: bool) -> bool {
        match self {
            Mode::Event => !is_rpc,
            Mode::Rpc => is_rpc,
            Mode::Both => true,
        }
    }
}

struct Route<A> {
    type_id: TypeId,
    type_name: &'static str,
    mode: Mode,
    topic_type: Option<String>,
    dispatch: DispatchFn<A>,
}

/// Registration table of an actor's handlers
pub struct Routes<A> {
    entries: Vec<Route<A>>,
    fallback: Option<DispatchFn<A>>,
}

impl<A> Default for Routes<A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            fallback: None,
        }
    }
}

impl<A: Send + 'static> Routes<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish-only handler; the reply is dropped
    pub fn event<M>(self) -> Self
    where
        A: Handler<M>,
        M: Send + Sync + 'static,
    {
        self.push::<M>(Mode::Event, None, dispatch_event::<A, M>)
    }

    pub fn event_on_topic<M>(self, topic_type: impl Into<String>) -> Self
    where
        A: Handler<M>,
        M: Send + Sync + 'static,
    {
        self.push::<M>(Mode::Event, Some(topic_type.into()), dispatch_event::<A, M>)
    }

    /// Send-only handler
    pub fn rpc<M>(self) -> Self
    where
        A: Handler<M>,
        M: Send + Sync + 'static,
    {
        self.push::<M>(Mode::Rpc, None, dispatch_message::<A, M>)
    }

    /// Handler for both publish and send deliveries
    pub fn message<M>(self) -> Self
    where
        A: Handler<M>,
        M: Send + Sync + 'static,
    {
        self.push::<M>(Mode::Both, None, dispatch_message::<A, M>)
    }

    pub fn message_on_topic<M>(self, topic_type: impl Into<String>) -> Self
    where
        A: Handler<M>,
        M: Send + Sync + 'static,
    {
        self.push::<M>(Mode::Both, Some(topic_type.into()), dispatch_message::<A, M>)
    }

    /// Catch-all for payloads no entry accepts
    pub fn fallback(mut self, dispatch: DispatchFn<A>) -> Self {
        self.fallback = Some(dispatch);
        self
    }

    fn push<M: 'static>(
        mut self,
        mode: Mode,
        topic_type: Option<String>,
        dispatch: DispatchFn<A>,
    ) -> Self {
        self.entries.push(Route {
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
            mode,
            topic_type,
            dispatch,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.fallback.is_none()
    }

    /// Payload type names with a declared handler, in declaration order
    pub fn handled_types(&self) -> Vec<&'static str> {
        self.entries.iter().map(|route| route.type_name).collect()
    }

    fn select(&self, payload: &Payload, ctx: &MessageContext) -> Option<DispatchFn<A>> {
        self.entries
            .iter()
            .find(|route| {
                route.type_id == payload.type_id()
                    && route.mode.accepts(ctx.is_rpc)
                    && match (&route.topic_type, &ctx.topic) {
                        (None, _) => true,
                        (Some(wanted), Some(topic)) => topic.topic_type() == wanted,
                        (Some(_), None) => false,
                    }
            })
            .map(|route| route.dispatch)
            .or(self.fallback)
    }
}

/// Actors dispatching through a [`Routes`] table
pub trait RoutedActor: Send + Sized + 'static {
    fn routes(&self) -> Arc<Routes<Self>>;
}

/// Route `payload` to the matching handler of `actor`. Unmatched payloads are
/// a no-op that replies with the unit payload.
pub async fn dispatch<A: RoutedActor>(
    actor: &mut A,
    payload: Payload,
    ctx: &MessageContext,
) -> Result<Payload, ActorError> {
    let routes = actor.routes();
    match routes.select(&payload, ctx) {
        Some(handler) => handler(actor, &payload, ctx).await,
        None => {
            debug!(
                agent_id = %ctx.recipient,
                message_type = payload.type_name(),
                is_rpc = ctx.is_rpc,
                "No handler matched; ignoring message"
            );
            Ok(Payload::unit())
        }
    }
}

fn downcast<'a, M: 'static>(
    payload: &'a Payload,
    ctx: &MessageContext,
) -> Result<&'a M, ActorError> {
    payload
        .downcast_ref::<M>()
        .ok_or_else(|| ActorError::UnexpectedMessage {
            agent: ctx.recipient.clone(),
            type_name: payload.type_name(),
        })
}

fn dispatch_message<'a, A, M>(
    actor: &'a mut A,
    payload: &'a Payload,
    ctx: &'a MessageContext,
) -> BoxFuture<'a, Result<Payload, ActorError>>
where
    A: Handler<M>,
    M: Send + Sync + 'static,
{
    Box::pin(async move {
        let message = downcast::<M>(payload, ctx)?;
        let reply = actor.handle(message, ctx).await?;
        Ok(Payload::new(reply))
    })
}

fn dispatch_event<'a, A, M>(
    actor: &'a mut A,
    payload: &'a Payload,
    ctx: &'a MessageContext,
) -> BoxFuture<'a, Result<Payload, ActorError>>
where
    A: Handler<M>,
    M: Send + Sync + 'static,
{
    Box::pin(async move {
        let message = downcast::<M>(payload, ctx)?;
        actor.handle(message, ctx).await?;
        Ok(Payload::unit())
    })
}
