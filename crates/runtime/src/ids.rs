//! Agent and topic addressing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IdError;

fn validate_type(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    match value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
    {
        Some(ch) => Err(IdError::InvalidCharacter {
            value: value.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

fn validate_key(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    match value.chars().find(|c| c.is_control()) {
        Some(ch) => Err(IdError::InvalidCharacter {
            value: value.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

/// Name of a class of agents, unique per runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentType(String);

impl AgentType {
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        validate_type(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AgentType {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for AgentType {
    type Error = IdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AgentType> for String {
    fn from(value: AgentType) -> Self {
        value.0
    }
}

impl AsRef<str> for AgentType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One agent instance: `(type, key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId {
    #[serde(rename = "type")]
    agent_type: AgentType,
    key: String,
}

impl AgentId {
    pub fn new(agent_type: &str, key: impl Into<String>) -> Result<Self, IdError> {
        Self::from_type(AgentType::new(agent_type)?, key)
    }

    pub fn from_type(agent_type: AgentType, key: impl Into<String>) -> Result<Self, IdError> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self { agent_type, key })
    }

    /// Key `"default"`
    pub fn default_for(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            key: "default".to_string(),
        }
    }

    // Topic sources pass the same validation as keys
    pub(crate) fn for_topic(agent_type: AgentType, topic: &TopicId) -> Self {
        Self {
            agent_type,
            key: topic.source.clone(),
        }
    }

    pub fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

impl FromStr for AgentId {
    type Err = IdError;

    /// Parses `type/key`; the key may itself contain `/`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (agent_type, key) = s.split_once('/').ok_or(IdError::MissingSeparator(s.to_string()))?;
        Self::new(agent_type, key)
    }
}

/// Broadcast channel address: `(type, source)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicId {
    #[serde(rename = "type")]
    topic_type: String,
    source: String,
}

impl TopicId {
    pub fn new(topic_type: impl Into<String>, source: impl Into<String>) -> Result<Self, IdError> {
        let topic_type = topic_type.into();
        let source = source.into();
        validate_type(&topic_type)?;
        validate_key(&source)?;
        Ok(Self { topic_type, source })
    }

    /// `("default", "default")`
    pub fn default_topic() -> Self {
        Self {
            topic_type: "default".to_string(),
            source: "default".to_string(),
        }
    }

    pub fn topic_type(&self) -> &str {
        &self.topic_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_type, self.source)
    }
}

impl FromStr for TopicId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (topic_type, source) =
            s.split_once('/').ok_or(IdError::MissingSeparator(s.to_string()))?;
        Self::new(topic_type, source)
    }
}
