//! In-process actor runtime
//!
//! Messages enter a single intake queue drained by one dispatcher task. The
//! dispatcher resolves recipients, creates instances on first delivery and
//! forwards each delivery to the recipient's mailbox worker, which runs the
//! handlers of that instance one at a time.

use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::actor::{ActorCell, AgentMetadata, BaseActor};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::ids::{AgentId, AgentType, TopicId};
use crate::mailbox::{Delivery, Mailbox, ReplySender, WorkTracker};
use crate::message::{MessageContext, Payload};
use crate::subscription::Subscription;

type BuildFn = dyn Fn(&AgentId) -> anyhow::Result<BuiltActor> + Send + Sync;

struct BuiltActor {
    cell: Arc<dyn ActorCell>,
    typed: Arc<dyn Any + Send + Sync>,
}

struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    build: Arc<BuildFn>,
}

#[derive(Clone)]
struct Instance {
    cell: Arc<dyn ActorCell>,
    typed: Arc<dyn Any + Send + Sync>,
    mailbox: Mailbox,
}

#[derive(Default)]
struct Registry {
    factories: HashMap<AgentType, Registration>,
    subscriptions: Vec<Subscription>,
    instances: HashMap<AgentId, Instance>,
    closed: bool,
}

enum Envelope {
    Send {
        payload: Payload,
        sender: Option<AgentId>,
        recipient: AgentId,
        message_id: String,
        cancellation: CancellationToken,
        reply: ReplySender,
        epoch: u64,
    },
    Publish {
        payload: Payload,
        sender: Option<AgentId>,
        topic: TopicId,
        message_id: String,
        cancellation: CancellationToken,
        epoch: u64,
    },
}

impl Envelope {
    fn epoch(&self) -> u64 {
        match self {
            Envelope::Send { epoch, .. } | Envelope::Publish { epoch, .. } => *epoch,
        }
    }
}

struct Dispatcher {
    handle: JoinHandle<mpsc::UnboundedReceiver<Envelope>>,
    stop: CancellationToken,
}

struct Lifecycle {
    intake: mpsc::UnboundedSender<Envelope>,
    /// Parked receiver while no dispatcher runs
    parked: Option<mpsc::UnboundedReceiver<Envelope>>,
    dispatcher: Option<Dispatcher>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    registry: Mutex<Registry>,
    lifecycle: Mutex<Lifecycle>,
    tracker: Arc<WorkTracker>,
}

/// Cloneable handle to an in-process runtime
#[derive(Clone)]
pub struct InProcessRuntime {
    inner: Arc<RuntimeInner>,
}

impl Default for InProcessRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl InProcessRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let (intake, parked) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(RuntimeInner {
                tracker: Arc::new(WorkTracker::new(config.ignore_unhandled_exceptions)),
                config,
                registry: Mutex::new(Registry::default()),
                lifecycle: Mutex::new(Lifecycle {
                    intake,
                    parked: Some(parked),
                    dispatcher: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ---- registration ----

    /// Register the factory for `agent_type`. The factory runs on first
    /// delivery to each key and must be cheap and non-blocking.
    pub fn register_factory<A, F>(&self, agent_type: &str, factory: F) -> Result<AgentType, RuntimeError>
    where
        A: BaseActor,
        F: Fn(&AgentId) -> anyhow::Result<A> + Send + Sync + 'static,
    {
        let agent_type = AgentType::new(agent_type)?;
        let build: Arc<BuildFn> = Arc::new(move |id: &AgentId| {
            let cell = Arc::new(tokio::sync::Mutex::new(factory(id)?));
            Ok(BuiltActor {
                cell: cell.clone(),
                typed: cell,
            })
        });

        let mut registry = self.inner.registry.lock();
        if registry.closed {
            return Err(RuntimeError::Closed);
        }
        if registry.factories.contains_key(&agent_type) {
            return Err(RuntimeError::AgentTypeAlreadyRegistered(agent_type.to_string()));
        }
        registry.factories.insert(
            agent_type.clone(),
            Registration {
                type_id: TypeId::of::<A>(),
                type_name: std::any::type_name::<A>(),
                build,
            },
        );
        info!(agent_type = %agent_type, actor = std::any::type_name::<A>(), "Registered agent factory");
        Ok(agent_type)
    }

    pub fn is_registered(&self, agent_type: &AgentType) -> bool {
        self.inner.registry.lock().factories.contains_key(agent_type)
    }

    pub fn add_subscription(&self, subscription: Subscription) -> Result<(), RuntimeError> {
        let mut registry = self.inner.registry.lock();
        if registry.closed {
            return Err(RuntimeError::Closed);
        }
        if registry.subscriptions.iter().any(|s| s.id() == subscription.id()) {
            return Err(RuntimeError::SubscriptionAlreadyExists(subscription.id().to_string()));
        }
        debug!(subscription_id = subscription.id(), rule = ?subscription.rule(), "Added subscription");
        registry.subscriptions.push(subscription);
        Ok(())
    }

    pub fn remove_subscription(&self, id: &str) -> Result<Subscription, RuntimeError> {
        let mut registry = self.inner.registry.lock();
        let position = registry
            .subscriptions
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| RuntimeError::SubscriptionNotFound(id.to_string()))?;
        debug!(subscription_id = id, "Removed subscription");
        Ok(registry.subscriptions.remove(position))
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.registry.lock().subscriptions.clone()
    }

    // ---- messaging ----

    /// Queue `message` for every agent subscribed to `topic`, except the
    /// sender. Returns once queued.
    pub async fn publish_message(
        &self,
        message: Payload,
        topic: TopicId,
        sender: Option<AgentId>,
        cancellation: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        debug!(topic = %topic, message_type = message.type_name(), "Publishing message");
        let epoch = self.inner.tracker.epoch();
        self.enqueue(Envelope::Publish {
            payload: message,
            sender,
            topic,
            message_id: Uuid::new_v4().to_string(),
            cancellation: cancellation.unwrap_or_default(),
            epoch,
        })
    }

    /// Deliver `message` to `recipient` and wait for its handler's reply.
    ///
    /// Sending from a handler to its own agent id deadlocks.
    pub async fn send_message(
        &self,
        message: Payload,
        recipient: AgentId,
        sender: Option<AgentId>,
        cancellation: Option<CancellationToken>,
    ) -> Result<Payload, RuntimeError> {
        self.ensure_open()?;
        let cancellation = cancellation.unwrap_or_default();
        let (reply, response) = oneshot::channel();
        debug!(recipient = %recipient, message_type = message.type_name(), "Sending message");

        let epoch = self.inner.tracker.epoch();
        self.enqueue(Envelope::Send {
            payload: message,
            sender,
            recipient: recipient.clone(),
            message_id: Uuid::new_v4().to_string(),
            cancellation: cancellation.clone(),
            reply,
            epoch,
        })?;

        tokio::select! {
            outcome = response => match outcome {
                Ok(result) => result,
                Err(_) => Err(RuntimeError::DeliveryAbandoned(recipient)),
            },
            _ = cancellation.cancelled() => Err(RuntimeError::Cancelled),
        }
    }

    /// Typed [`send_message`](Self::send_message)
    pub async fn send<M, R>(&self, message: M, recipient: AgentId) -> Result<R, RuntimeError>
    where
        M: Any + Send + Sync,
        R: Any + Send + Sync + Clone,
    {
        let reply = self
            .send_message(Payload::new(message), recipient, None, None)
            .await?;
        let actual = reply.type_name();
        let reply = reply.downcast::<R>().map_err(|_| RuntimeError::UnexpectedReply {
            expected: std::any::type_name::<R>(),
            actual,
        })?;
        Ok(Arc::try_unwrap(reply).unwrap_or_else(|shared| (*shared).clone()))
    }

    fn enqueue(&self, envelope: Envelope) -> Result<(), RuntimeError> {
        let lifecycle = self.inner.lifecycle.lock();
        self.inner.tracker.begin();
        if lifecycle.intake.send(envelope).is_err() {
            self.inner.tracker.finish();
            return Err(RuntimeError::Closed);
        }
        Ok(())
    }

    // ---- instances ----

    /// Shared handle to the instance behind `id`, constructing it on first
    /// access. Repeated calls return the same instance.
    pub async fn try_get_underlying_agent_instance<A: BaseActor>(
        &self,
        id: &AgentId,
    ) -> Result<Arc<tokio::sync::Mutex<A>>, RuntimeError> {
        self.ensure_open()?;
        let mismatch = || RuntimeError::TypeMismatch {
            agent: id.clone(),
            expected: std::any::type_name::<A>(),
        };

        {
            let registry = self.inner.registry.lock();
            let registration = registry
                .factories
                .get(id.agent_type())
                .ok_or_else(|| RuntimeError::UnknownAgentType(id.agent_type().to_string()))?;
            if registration.type_id != TypeId::of::<A>() {
                return Err(mismatch());
            }
        }

        self.inner
            .instance(id)?
            .typed
            .downcast::<tokio::sync::Mutex<A>>()
            .map_err(|_| mismatch())
    }

    /// Resolve `(agent_type, key)`; constructs the instance now unless `lazy`
    pub async fn get(&self, agent_type: &AgentType, key: &str, lazy: bool) -> Result<AgentId, RuntimeError> {
        self.ensure_open()?;
        if !self.is_registered(agent_type) {
            return Err(RuntimeError::UnknownAgentType(agent_type.to_string()));
        }
        let id = AgentId::from_type(agent_type.clone(), key)?;
        if !lazy {
            self.inner.instance(&id)?;
        }
        Ok(id)
    }

    pub async fn agent_metadata(&self, id: &AgentId) -> Result<AgentMetadata, RuntimeError> {
        let instance = self.inner.instance(id)?;
        Ok(AgentMetadata {
            agent_type: id.agent_type().to_string(),
            key: id.key().to_string(),
            description: instance.cell.description().await,
        })
    }

    pub async fn agent_save_state(&self, id: &AgentId) -> Result<Value, RuntimeError> {
        let instance = self.inner.instance(id)?;
        instance.cell.save_state().await.map_err(|source| RuntimeError::Handler {
            agent: id.clone(),
            source,
        })
    }

    pub async fn agent_load_state(&self, id: &AgentId, state: Value) -> Result<(), RuntimeError> {
        let instance = self.inner.instance(id)?;
        instance.cell.load_state(state).await.map_err(|source| RuntimeError::Handler {
            agent: id.clone(),
            source,
        })
    }

    /// Snapshot of every instantiated agent, keyed by `type/key`
    pub async fn save_state(&self) -> Result<Value, RuntimeError> {
        let instances: Vec<(AgentId, Instance)> = {
            let registry = self.inner.registry.lock();
            registry
                .instances
                .iter()
                .map(|(id, instance)| (id.clone(), instance.clone()))
                .collect()
        };

        let mut snapshot = Map::new();
        for (id, instance) in instances {
            let state = instance.cell.save_state().await.map_err(|source| RuntimeError::Handler {
                agent: id.clone(),
                source,
            })?;
            snapshot.insert(id.to_string(), state);
        }
        Ok(Value::Object(snapshot))
    }

    /// Restore a snapshot from [`save_state`](Self::save_state), creating
    /// instances as needed
    pub async fn load_state(&self, state: &Value) -> Result<(), RuntimeError> {
        let entries = state
            .as_object()
            .ok_or_else(|| RuntimeError::State("snapshot must be a JSON object".to_string()))?;

        for (key, agent_state) in entries {
            let id: AgentId = key.parse()?;
            self.agent_load_state(&id, agent_state.clone()).await?;
        }
        Ok(())
    }

    // ---- lifecycle ----

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().dispatcher.is_some()
    }

    /// Queued plus in-flight work items
    pub fn pending_work(&self) -> usize {
        self.inner.tracker.pending()
    }

    /// Begin processing queued messages. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.dispatcher.is_some() {
            return Err(RuntimeError::AlreadyRunning);
        }
        let intake = lifecycle.parked.take().ok_or(RuntimeError::AlreadyRunning)?;

        let stop = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(Arc::downgrade(&self.inner), intake, stop.clone()));
        lifecycle.dispatcher = Some(Dispatcher { handle, stop });

        info!("Runtime started");
        Ok(())
    }

    /// Halt intake now. Messages not yet handled are abandoned; a handler
    /// already running finishes on its own.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let dispatcher = self
            .inner
            .lifecycle
            .lock()
            .dispatcher
            .take()
            .ok_or(RuntimeError::NotRunning)?;

        self.inner.tracker.advance_epoch();
        dispatcher.stop.cancel();

        match dispatcher.handle.await {
            Ok(intake) => {
                self.inner.lifecycle.lock().parked = Some(intake);
            }
            Err(e) => {
                error!(error = %e, "Dispatcher task failed; resetting intake queue");
                let (intake, parked) = mpsc::unbounded_channel();
                let mut lifecycle = self.inner.lifecycle.lock();
                lifecycle.intake = intake;
                lifecycle.parked = Some(parked);
                self.inner.tracker.reset();
            }
        }

        info!("Runtime stopped");
        match self.inner.tracker.take_failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Wait until nothing is queued or running, then stop
    pub async fn stop_when_idle(&self) -> Result<(), RuntimeError> {
        if !self.is_running() {
            return Err(RuntimeError::NotRunning);
        }
        self.inner.tracker.wait_idle().await;
        debug!("Runtime idle");
        self.stop().await
    }

    /// Stop if running, close every actor and release the registry. Any
    /// further call fails with [`RuntimeError::Closed`].
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<(), RuntimeError> {
        let stopped = if self.is_running() {
            self.stop().await
        } else {
            Ok(())
        };

        let instances: Vec<(AgentId, Instance)> = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return Err(RuntimeError::Closed);
            }
            registry.closed = true;
            registry.subscriptions.clear();
            registry.factories.clear();
            registry.instances.drain().collect()
        };

        let timeout = self.inner.config.shutdown_timeout;
        for (id, instance) in instances {
            match tokio::time::timeout(timeout, instance.cell.close()).await {
                Ok(Ok(())) => debug!(agent_id = %id, "Agent closed"),
                Ok(Err(e)) => warn!(agent_id = %id, error = %e, "Agent close failed"),
                Err(_) => warn!(agent_id = %id, timeout_ms = timeout.as_millis() as u64, "Agent close timed out"),
            }
        }

        info!("Runtime closed");
        stopped
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.inner.registry.lock().closed {
            return Err(RuntimeError::Closed);
        }
        Ok(())
    }
}

impl RuntimeInner {
    /// Cached instance for `id`, built on first use. The factory runs without
    /// the registry lock held.
    fn instance(&self, id: &AgentId) -> Result<Instance, RuntimeError> {
        let build = {
            let registry = self.registry.lock();
            if registry.closed {
                return Err(RuntimeError::Closed);
            }
            if let Some(instance) = registry.instances.get(id) {
                return Ok(instance.clone());
            }
            let registration = registry
                .factories
                .get(id.agent_type())
                .ok_or_else(|| RuntimeError::UnknownAgentType(id.agent_type().to_string()))?;
            registration.build.clone()
        };

        let built = match std::panic::catch_unwind(AssertUnwindSafe(|| build(id))) {
            Ok(Ok(built)) => built,
            Ok(Err(e)) => {
                return Err(RuntimeError::Construction {
                    agent: id.clone(),
                    reason: format!("{:#}", e),
                })
            }
            Err(_) => {
                return Err(RuntimeError::Construction {
                    agent: id.clone(),
                    reason: "factory panicked".to_string(),
                })
            }
        };

        let mut registry = self.registry.lock();
        if registry.closed {
            return Err(RuntimeError::Closed);
        }
        if let Some(existing) = registry.instances.get(id) {
            return Ok(existing.clone());
        }

        let instance = Instance {
            mailbox: Mailbox::spawn(id.clone(), built.cell.clone(), self.tracker.clone()),
            cell: built.cell,
            typed: built.typed,
        };
        registry.instances.insert(id.clone(), instance.clone());
        info!(agent_id = %id, "Agent instantiated");
        Ok(instance)
    }

    /// Distinct recipients of `topic` with the subscriptions that matched each
    fn recipients(&self, topic: &TopicId, sender: Option<&AgentId>) -> Vec<(AgentId, Vec<Subscription>)> {
        let registry = self.registry.lock();
        let mut recipients: Vec<(AgentId, Vec<Subscription>)> = Vec::new();

        for subscription in &registry.subscriptions {
            let Some(id) = subscription.map_to_agent(topic) else {
                continue;
            };
            if sender == Some(&id) {
                continue;
            }
            match recipients.iter_mut().find(|(existing, _)| *existing == id) {
                Some((_, matched)) => matched.push(subscription.clone()),
                None => recipients.push((id, vec![subscription.clone()])),
            }
        }
        recipients
    }

    fn route(&self, runtime: &InProcessRuntime, envelope: Envelope) {
        if !self.tracker.is_current(envelope.epoch()) {
            debug!("Dropping envelope queued before stop");
            self.tracker.finish();
            return;
        }

        match envelope {
            Envelope::Send {
                payload,
                sender,
                recipient,
                message_id,
                cancellation,
                reply,
                epoch,
            } => match self.instance(&recipient) {
                Ok(instance) => {
                    let context = MessageContext::new(
                        recipient,
                        sender,
                        None,
                        message_id,
                        Vec::new(),
                        cancellation,
                        runtime.clone(),
                    );
                    self.deliver(&instance, Delivery {
                        payload,
                        context,
                        reply: Some(reply),
                        epoch,
                    });
                }
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "Cannot deliver sent message");
                    let _ = reply.send(Err(e));
                }
            },
            Envelope::Publish {
                payload,
                sender,
                topic,
                message_id,
                cancellation,
                epoch,
            } => {
                let recipients = self.recipients(&topic, sender.as_ref());
                if recipients.is_empty() {
                    debug!(topic = %topic, "No subscribers for topic");
                }

                for (recipient, subscriptions) in recipients {
                    let instance = match self.instance(&recipient) {
                        Ok(instance) => instance,
                        Err(e) => {
                            error!(
                                recipient = %recipient,
                                topic = %topic,
                                error = %e,
                                "Failed to instantiate agent; dropping delivery"
                            );
                            continue;
                        }
                    };
                    let context = MessageContext::new(
                        recipient,
                        sender.clone(),
                        Some(topic.clone()),
                        message_id.clone(),
                        subscriptions,
                        cancellation.clone(),
                        runtime.clone(),
                    );
                    self.deliver(&instance, Delivery {
                        payload: payload.clone(),
                        context,
                        reply: None,
                        epoch,
                    });
                }
            }
        }

        self.tracker.finish();
    }

    fn deliver(&self, instance: &Instance, delivery: Delivery) {
        self.tracker.begin();
        if let Err(undelivered) = instance.mailbox.deliver(delivery) {
            warn!(recipient = %undelivered.context.recipient, "Mailbox closed; message dropped");
            self.tracker.finish();
        }
    }
}

async fn dispatch_loop(
    inner: Weak<RuntimeInner>,
    mut intake: mpsc::UnboundedReceiver<Envelope>,
    stop: CancellationToken,
) -> mpsc::UnboundedReceiver<Envelope> {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = intake.recv() => {
                let Some(envelope) = next else { break };
                let Some(inner) = inner.upgrade() else { break };
                let runtime = InProcessRuntime { inner: inner.clone() };
                inner.route(&runtime, envelope);
            }
        }
    }
    debug!("Dispatcher exited");
    intake
}
