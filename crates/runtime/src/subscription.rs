//! Topic-to-agent subscription rules

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;
use crate::ids::{AgentId, AgentType, TopicId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionRule {
    /// Exact topic type
    Type {
        topic_type: String,
        agent_type: AgentType,
    },
    /// Any topic type starting with `prefix`
    TypePrefix { prefix: String, agent_type: AgentType },
}

/// A rule plus its unique id. Matched topics map to
/// `AgentId(agent_type, topic.source)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    id: String,
    rule: SubscriptionRule,
}

impl Subscription {
    pub fn type_subscription(
        topic_type: impl Into<String>,
        agent_type: AgentType,
    ) -> Result<Self, IdError> {
        let topic_type = topic_type.into();
        // topic types follow agent type rules
        AgentType::new(topic_type.as_str())?;
        Ok(Self::from_rule(SubscriptionRule::Type {
            topic_type,
            agent_type,
        }))
    }

    pub fn type_prefix(prefix: impl Into<String>, agent_type: AgentType) -> Result<Self, IdError> {
        let prefix = prefix.into();
        AgentType::new(prefix.as_str())?;
        Ok(Self::from_rule(SubscriptionRule::TypePrefix { prefix, agent_type }))
    }

    /// Binds `agent_type` to the `"default"` topic type
    pub fn default_for(agent_type: AgentType) -> Self {
        Self::from_rule(SubscriptionRule::Type {
            topic_type: "default".to_string(),
            agent_type,
        })
    }

    fn from_rule(rule: SubscriptionRule) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule,
        }
    }

    /// Replace the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rule(&self) -> &SubscriptionRule {
        &self.rule
    }

    pub fn agent_type(&self) -> &AgentType {
        match &self.rule {
            SubscriptionRule::Type { agent_type, .. } => agent_type,
            SubscriptionRule::TypePrefix { agent_type, .. } => agent_type,
        }
    }

    pub fn is_match(&self, topic: &TopicId) -> bool {
        match &self.rule {
            SubscriptionRule::Type { topic_type, .. } => topic.topic_type() == topic_type,
            SubscriptionRule::TypePrefix { prefix, .. } => topic.topic_type().starts_with(prefix.as_str()),
        }
    }

    /// Recipient for `topic`, or `None` when the rule does not match
    pub fn map_to_agent(&self, topic: &TopicId) -> Option<AgentId> {
        self.is_match(topic)
            .then(|| AgentId::for_topic(self.agent_type().clone(), topic))
    }
}
