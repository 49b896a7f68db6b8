use anyhow::anyhow;
use async_trait::async_trait;
use runtime::{
    ActorError, AgentId, AgentType, BaseActor, InProcessRuntime, MessageContext, Payload,
    RuntimeConfig, RuntimeError, Subscription, TopicId,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct MessageType;

#[derive(Debug, Clone)]
struct Numbered(u32);

#[derive(Debug, Clone)]
struct Cascading {
    round: u32,
}

#[derive(Debug, Default)]
struct LoopbackAgent {
    num_calls: usize,
    seen: Vec<u32>,
}

#[async_trait]
impl BaseActor for LoopbackAgent {
    async fn handle_message(&mut self, message: Payload, _ctx: &MessageContext) -> Result<Payload, ActorError> {
        self.num_calls += 1;
        if let Some(Numbered(n)) = message.downcast_ref::<Numbered>() {
            self.seen.push(*n);
        }
        Ok(message)
    }

    async fn save_state(&mut self) -> Result<Value, ActorError> {
        Ok(json!({ "num_calls": self.num_calls }))
    }

    async fn load_state(&mut self, state: Value) -> Result<(), ActorError> {
        self.num_calls = state["num_calls"]
            .as_u64()
            .ok_or_else(|| ActorError::State("missing num_calls".into()))? as usize;
        Ok(())
    }
}

struct CascadingAgent {
    num_calls: usize,
    max_rounds: u32,
}

#[async_trait]
impl BaseActor for CascadingAgent {
    async fn handle_message(&mut self, message: Payload, ctx: &MessageContext) -> Result<Payload, ActorError> {
        let Some(cascading) = message.downcast_ref::<Cascading>() else {
            return Ok(Payload::unit());
        };
        self.num_calls += 1;
        if cascading.round == self.max_rounds {
            return Ok(Payload::unit());
        }
        ctx.publish(
            Cascading {
                round: cascading.round + 1,
            },
            TopicId::default_topic(),
        )
        .await?;
        Ok(Payload::unit())
    }
}

struct FailingAgent {
    num_calls: usize,
}

#[async_trait]
impl BaseActor for FailingAgent {
    async fn handle_message(&mut self, message: Payload, _ctx: &MessageContext) -> Result<Payload, ActorError> {
        self.num_calls += 1;
        match message.downcast_ref::<Numbered>() {
            Some(Numbered(0)) => Err(ActorError::Handler("refusing message 0".into())),
            _ => Ok(Payload::unit()),
        }
    }
}

#[derive(Debug)]
struct SlowAgent {
    num_calls: usize,
}

#[async_trait]
impl BaseActor for SlowAgent {
    async fn handle_message(&mut self, _message: Payload, _ctx: &MessageContext) -> Result<Payload, ActorError> {
        self.num_calls += 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Payload::unit())
    }
}

fn loopback_runtime(config: RuntimeConfig) -> (InProcessRuntime, AgentType) {
    let runtime = InProcessRuntime::new(config);
    let agent_type = runtime
        .register_factory("name", |_id: &AgentId| Ok(LoopbackAgent::default()))
        .unwrap();
    runtime
        .add_subscription(Subscription::type_subscription("default", agent_type.clone()).unwrap())
        .unwrap();
    (runtime, agent_type)
}

#[tokio::test]
async fn test_loopback_scenario() {
    let (runtime, agent_type) = loopback_runtime(RuntimeConfig::default());
    runtime.start().unwrap();

    runtime
        .publish_message(Payload::new(MessageType), TopicId::default_topic(), None, None)
        .await
        .unwrap();
    runtime.stop_when_idle().await.unwrap();

    let default_id = AgentId::from_type(agent_type.clone(), "default").unwrap();
    let agent = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&default_id)
        .await
        .unwrap();
    assert_eq!(agent.lock().await.num_calls, 1);

    let other_id = AgentId::from_type(agent_type, "other").unwrap();
    let other = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&other_id)
        .await
        .unwrap();
    assert_eq!(other.lock().await.num_calls, 0);
}

#[tokio::test]
async fn test_instance_identity_and_type_check() {
    let (runtime, agent_type) = loopback_runtime(RuntimeConfig::default());
    let id = AgentId::default_for(agent_type);

    let first = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&id)
        .await
        .unwrap();
    let second = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&id)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let err = runtime
        .try_get_underlying_agent_instance::<SlowAgent>(&id)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { .. }));

    let unknown = AgentId::new("missing", "default").unwrap();
    let err = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&unknown)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownAgentType(_)));
}

#[tokio::test]
async fn test_publish_preserves_order_per_recipient() {
    let (runtime, agent_type) = loopback_runtime(RuntimeConfig::default());
    runtime.start().unwrap();

    for n in 0..100 {
        runtime
            .publish_message(Payload::new(Numbered(n)), TopicId::default_topic(), None, None)
            .await
            .unwrap();
    }
    runtime.stop_when_idle().await.unwrap();

    let agent = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&AgentId::default_for(agent_type))
        .await
        .unwrap();
    let agent = agent.lock().await;
    assert_eq!(agent.num_calls, 100);
    assert_eq!(agent.seen, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_unmatched_topic_reaches_nobody() {
    let (runtime, agent_type) = loopback_runtime(RuntimeConfig::default());
    runtime.start().unwrap();

    runtime
        .publish_message(
            Payload::new(MessageType),
            TopicId::new("unrelated", "default").unwrap(),
            None,
            None,
        )
        .await
        .unwrap();
    runtime.stop_when_idle().await.unwrap();

    let agent = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&AgentId::default_for(agent_type))
        .await
        .unwrap();
    assert_eq!(agent.lock().await.num_calls, 0);
}

#[tokio::test]
async fn test_publish_is_scoped_by_topic_source() {
    let (runtime, agent_type) = loopback_runtime(RuntimeConfig::default());
    runtime.start().unwrap();

    let scoped = TopicId::new("default", "run-1").unwrap();
    runtime
        .publish_message(Payload::new(MessageType), scoped, None, None)
        .await
        .unwrap();
    runtime.stop_when_idle().await.unwrap();

    let run_agent = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&AgentId::from_type(agent_type.clone(), "run-1").unwrap())
        .await
        .unwrap();
    let default_agent = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&AgentId::default_for(agent_type))
        .await
        .unwrap();
    assert_eq!(run_agent.lock().await.num_calls, 1);
    assert_eq!(default_agent.lock().await.num_calls, 0);
}

#[tokio::test]
async fn test_duplicate_subscription_and_removal() {
    let (runtime, agent_type) = loopback_runtime(RuntimeConfig::default());
    let subscription = Subscription::default_for(agent_type.clone()).with_id("fixed");
    runtime.add_subscription(subscription.clone()).unwrap();

    let err = runtime.add_subscription(subscription).unwrap_err();
    assert!(matches!(err, RuntimeError::SubscriptionAlreadyExists(id) if id == "fixed"));

    runtime.remove_subscription("fixed").unwrap();
    assert!(matches!(
        runtime.remove_subscription("fixed"),
        Err(RuntimeError::SubscriptionNotFound(_))
    ));
    assert_eq!(runtime.subscriptions().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cascading_publish_counts() {
    const NUM_AGENTS: usize = 5;
    const NUM_INITIAL: usize = 5;
    const MAX_ROUNDS: u32 = 5;

    let runtime = InProcessRuntime::default();
    let mut types = Vec::new();
    for i in 0..NUM_AGENTS {
        let agent_type = runtime
            .register_factory(&format!("cascading_{}", i), |_id: &AgentId| {
                Ok(CascadingAgent {
                    num_calls: 0,
                    max_rounds: MAX_ROUNDS,
                })
            })
            .unwrap();
        runtime
            .add_subscription(Subscription::default_for(agent_type.clone()))
            .unwrap();
        types.push(agent_type);
    }

    runtime.start().unwrap();
    for _ in 0..NUM_INITIAL {
        runtime
            .publish_message(Payload::new(Cascading { round: 1 }), TopicId::default_topic(), None, None)
            .await
            .unwrap();
    }
    runtime.stop_when_idle().await.unwrap();

    let expected: usize = (0..MAX_ROUNDS)
        .map(|i| NUM_INITIAL * (NUM_AGENTS - 1).pow(i))
        .sum();
    assert_eq!(expected, 1705);

    for agent_type in types {
        let agent = runtime
            .try_get_underlying_agent_instance::<CascadingAgent>(&AgentId::default_for(agent_type))
            .await
            .unwrap();
        assert_eq!(agent.lock().await.num_calls, expected);
    }
}

#[tokio::test]
async fn test_handler_error_surfaces_from_stop_when_propagating() {
    let runtime = InProcessRuntime::new(RuntimeConfig::propagating_handler_errors());
    let agent_type = runtime
        .register_factory("failing", |_id: &AgentId| Ok(FailingAgent { num_calls: 0 }))
        .unwrap();
    runtime
        .add_subscription(Subscription::default_for(agent_type.clone()))
        .unwrap();
    runtime.start().unwrap();

    for n in 0..3 {
        runtime
            .publish_message(Payload::new(Numbered(n)), TopicId::default_topic(), None, None)
            .await
            .unwrap();
    }
    let err = runtime.stop_when_idle().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Handler { .. }));

    // later deliveries were still attempted
    let agent = runtime
        .try_get_underlying_agent_instance::<FailingAgent>(&AgentId::default_for(agent_type))
        .await
        .unwrap();
    assert_eq!(agent.lock().await.num_calls, 3);

    // the failure is reported once
    runtime.start().unwrap();
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_handler_error_swallowed_by_default() {
    let runtime = InProcessRuntime::default();
    let agent_type = runtime
        .register_factory("failing", |_id: &AgentId| Ok(FailingAgent { num_calls: 0 }))
        .unwrap();
    runtime
        .add_subscription(Subscription::default_for(agent_type))
        .unwrap();
    runtime.start().unwrap();

    runtime
        .publish_message(Payload::new(Numbered(0)), TopicId::default_topic(), None, None)
        .await
        .unwrap();
    runtime.stop_when_idle().await.unwrap();
}

#[tokio::test]
async fn test_send_returns_handler_error() {
    let runtime = InProcessRuntime::default();
    let agent_type = runtime
        .register_factory("failing", |_id: &AgentId| Ok(FailingAgent { num_calls: 0 }))
        .unwrap();
    runtime.start().unwrap();

    let err = runtime
        .send_message(Payload::new(Numbered(0)), AgentId::default_for(agent_type), None, None)
        .await
        .unwrap_err();
    match err {
        RuntimeError::Handler { agent, source } => {
            assert_eq!(agent.to_string(), "failing/default");
            assert!(source.to_string().contains("refusing"));
        }
        other => panic!("unexpected error: {other}"),
    }
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_factory_failure_drops_delivery() {
    let runtime = InProcessRuntime::default();
    let broken = runtime
        .register_factory::<LoopbackAgent, _>("broken", |id: &AgentId| Err(anyhow!("cannot build {}", id)))
        .unwrap();
    runtime
        .add_subscription(Subscription::default_for(broken.clone()))
        .unwrap();
    let healthy = runtime
        .register_factory("healthy", |_id: &AgentId| Ok(LoopbackAgent::default()))
        .unwrap();
    runtime
        .add_subscription(Subscription::default_for(healthy.clone()))
        .unwrap();
    runtime.start().unwrap();

    runtime
        .publish_message(Payload::new(MessageType), TopicId::default_topic(), None, None)
        .await
        .unwrap();

    let err = runtime
        .send_message(Payload::new(MessageType), AgentId::default_for(broken), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Construction { .. }));

    runtime.stop_when_idle().await.unwrap();
    let agent = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&AgentId::default_for(healthy))
        .await
        .unwrap();
    assert_eq!(agent.lock().await.num_calls, 1);
}

#[tokio::test]
async fn test_messages_queued_before_start_are_processed() {
    let (runtime, agent_type) = loopback_runtime(RuntimeConfig::default());
    runtime
        .publish_message(Payload::new(MessageType), TopicId::default_topic(), None, None)
        .await
        .unwrap();

    runtime.start().unwrap();
    runtime.stop_when_idle().await.unwrap();

    let agent = runtime
        .try_get_underlying_agent_instance::<LoopbackAgent>(&AgentId::default_for(agent_type))
        .await
        .unwrap();
    assert_eq!(agent.lock().await.num_calls, 1);
}

#[tokio::test]
async fn test_stop_abandons_undelivered_and_runtime_restarts() {
    let runtime = InProcessRuntime::default();
    let agent_type = runtime
        .register_factory("slow", |_id: &AgentId| Ok(SlowAgent { num_calls: 0 }))
        .unwrap();
    runtime
        .add_subscription(Subscription::default_for(agent_type.clone()))
        .unwrap();
    runtime.start().unwrap();

    for n in 0..3 {
        runtime
            .publish_message(Payload::new(Numbered(n)), TopicId::default_topic(), None, None)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    runtime.stop().await.unwrap();

    runtime.start().unwrap();
    runtime.stop_when_idle().await.unwrap();

    let agent = runtime
        .try_get_underlying_agent_instance::<SlowAgent>(&AgentId::default_for(agent_type.clone()))
        .await
        .unwrap();
    assert_eq!(agent.lock().await.num_calls, 1);

    runtime.start().unwrap();
    runtime
        .publish_message(Payload::new(Numbered(9)), TopicId::default_topic(), None, None)
        .await
        .unwrap();
    runtime.stop_when_idle().await.unwrap();
    assert_eq!(agent.lock().await.num_calls, 2);
    assert_eq!(runtime.pending_work(), 0);
}

#[tokio::test]
async fn test_state_roundtrip_between_runtimes() {
    let (source, agent_type) = loopback_runtime(RuntimeConfig::default());
    source.start().unwrap();
    for _ in 0..3 {
        source
            .publish_message(Payload::new(MessageType), TopicId::default_topic(), None, None)
            .await
            .unwrap();
    }
    source.stop_when_idle().await.unwrap();
    let snapshot = source.save_state().await.unwrap();
    assert_eq!(snapshot["name/default"]["num_calls"], 3);

    let (target, _) = loopback_runtime(RuntimeConfig::default());
    target.load_state(&snapshot).await.unwrap();
    let restored = target
        .try_get_underlying_agent_instance::<LoopbackAgent>(&AgentId::default_for(agent_type))
        .await
        .unwrap();
    assert_eq!(restored.lock().await.num_calls, 3);

    assert!(matches!(
        target.load_state(&json!([1, 2])).await,
        Err(RuntimeError::State(_))
    ));
}

#[tokio::test]
async fn test_send_cancellation() {
    let runtime = InProcessRuntime::default();
    let agent_type = runtime
        .register_factory("slow", |_id: &AgentId| Ok(SlowAgent { num_calls: 0 }))
        .unwrap();
    runtime.start().unwrap();

    let token = runtime::CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        canceller.cancel();
    });

    let err = runtime
        .send_message(Payload::unit(), AgentId::default_for(agent_type), None, Some(token))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Cancelled));
    runtime.stop_when_idle().await.unwrap();
}

#[tokio::test]
async fn test_closed_runtime_rejects_calls() {
    let (runtime, agent_type) = loopback_runtime(RuntimeConfig::default());
    runtime.start().unwrap();
    runtime.close().await.unwrap();

    assert!(matches!(
        runtime
            .publish_message(Payload::unit(), TopicId::default_topic(), None, None)
            .await,
        Err(RuntimeError::Closed)
    ));
    assert!(matches!(
        runtime
            .try_get_underlying_agent_instance::<LoopbackAgent>(&AgentId::default_for(agent_type))
            .await,
        Err(RuntimeError::Closed)
    ));
}
