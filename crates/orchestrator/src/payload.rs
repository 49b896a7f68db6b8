//! Task and result normalization
//!
//! Orchestrations speak [`ChatPayload`] internally. Tasks and outputs of any
//! other type go through an async transform, or through JSON by default.

use futures::future::BoxFuture;
use llm::ChatMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

use crate::error::OrchestrationError;

/// Common representation of a task or a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatPayload {
    Message(ChatMessage),
    Messages(Vec<ChatMessage>),
}

impl ChatPayload {
    pub fn messages(&self) -> Vec<ChatMessage> {
        match self {
            ChatPayload::Message(message) => vec![message.clone()],
            ChatPayload::Messages(messages) => messages.clone(),
        }
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            ChatPayload::Message(message) => vec![message],
            ChatPayload::Messages(messages) => messages,
        }
    }

    pub fn as_message(&self) -> Option<&ChatMessage> {
        match self {
            ChatPayload::Message(message) => Some(message),
            ChatPayload::Messages(_) => None,
        }
    }
}

impl From<ChatMessage> for ChatPayload {
    fn from(message: ChatMessage) -> Self {
        ChatPayload::Message(message)
    }
}

impl From<Vec<ChatMessage>> for ChatPayload {
    fn from(messages: Vec<ChatMessage>) -> Self {
        ChatPayload::Messages(messages)
    }
}

impl From<&str> for ChatPayload {
    fn from(task: &str) -> Self {
        ChatPayload::Message(ChatMessage::user(task))
    }
}

pub type InputTransform<TIn> =
    Arc<dyn Fn(TIn) -> BoxFuture<'static, Result<ChatPayload, OrchestrationError>> + Send + Sync>;

pub type OutputTransform<TOut> =
    Arc<dyn Fn(ChatPayload) -> BoxFuture<'static, Result<TOut, OrchestrationError>> + Send + Sync>;

/// Move the value out of `slot` when `T` and `U` are the same type
fn take_as<T: 'static, U: 'static>(slot: &mut Option<T>) -> Option<U> {
    (slot as &mut dyn Any)
        .downcast_mut::<Option<U>>()
        .and_then(Option::take)
}

/// Chat types pass through; anything else becomes one user message holding
/// its JSON form.
pub fn default_input_transform<TIn>(task: TIn) -> Result<ChatPayload, OrchestrationError>
where
    TIn: Serialize + 'static,
{
    let mut slot = Some(task);
    if let Some(payload) = take_as::<TIn, ChatPayload>(&mut slot) {
        return Ok(payload);
    }
    if let Some(message) = take_as::<TIn, ChatMessage>(&mut slot) {
        return Ok(ChatPayload::Message(message));
    }
    if let Some(messages) = take_as::<TIn, Vec<ChatMessage>>(&mut slot) {
        return Ok(ChatPayload::Messages(messages));
    }

    let task = slot.ok_or_else(|| OrchestrationError::Internal("task consumed".to_string()))?;
    let content = serde_json::to_string(&task)?;
    Ok(ChatPayload::Message(ChatMessage::user(content)))
}

/// Inverse of [`default_input_transform`]: chat types pass through when the
/// payload already has that shape; custom types are parsed from the content
/// of a single message.
pub fn default_output_transform<TOut>(payload: ChatPayload) -> Result<TOut, OrchestrationError>
where
    TOut: DeserializeOwned + 'static,
{
    let mut slot = Some(payload);
    if let Some(output) = take_as::<ChatPayload, TOut>(&mut slot) {
        return Ok(output);
    }
    let payload = slot.ok_or_else(|| OrchestrationError::Internal("payload consumed".to_string()))?;
    let target = std::any::type_name::<TOut>();

    match payload {
        ChatPayload::Message(message) => {
            let mut message_slot = Some(message);
            if let Some(output) = take_as::<ChatMessage, TOut>(&mut message_slot) {
                return Ok(output);
            }
            if is_type::<TOut, Vec<ChatMessage>>() {
                return Err(OrchestrationError::TypeError(format!(
                    "Expected a list of messages for {}, got a single message",
                    target
                )));
            }
            let message = message_slot
                .ok_or_else(|| OrchestrationError::Internal("message consumed".to_string()))?;
            serde_json::from_str(&message.content).map_err(|e| {
                OrchestrationError::Serialization(format!("Cannot parse {}: {}", target, e))
            })
        }
        ChatPayload::Messages(messages) => {
            let mut messages_slot = Some(messages);
            if let Some(output) = take_as::<Vec<ChatMessage>, TOut>(&mut messages_slot) {
                return Ok(output);
            }
            Err(OrchestrationError::TypeError(format!(
                "Expected a single message for {}, got a list",
                target
            )))
        }
    }
}

fn is_type<T: 'static, U: 'static>() -> bool {
    std::any::TypeId::of::<T>() == std::any::TypeId::of::<U>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::AuthorRole;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ticket {
        title: String,
        priority: u8,
    }

    #[test]
    fn test_chat_message_passes_through_both_ways() {
        let message = ChatMessage::assistant("done").with_name("Writer");

        let payload = default_input_transform(message.clone()).unwrap();
        assert_eq!(payload, ChatPayload::Message(message.clone()));

        let back: ChatMessage = default_output_transform(payload).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_custom_type_roundtrips_through_json() {
        let ticket = Ticket {
            title: "Fix login".into(),
            priority: 2,
        };

        let payload = default_input_transform(ticket.clone()).unwrap();
        let message = payload.as_message().unwrap();
        assert_eq!(message.role, AuthorRole::User);

        let back: Ticket = default_output_transform(payload).unwrap();
        assert_eq!(back, ticket);
    }

    #[test]
    fn test_list_payload_for_custom_type_is_type_error() {
        let payload = ChatPayload::Messages(vec![ChatMessage::assistant("{}")]);
        let err = default_output_transform::<Ticket>(payload).unwrap_err();
        assert!(matches!(err, OrchestrationError::TypeError(_)));
    }

    #[test]
    fn test_message_list_passes_through() {
        let messages = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        let payload = default_input_transform(messages.clone()).unwrap();
        let back: Vec<ChatMessage> = default_output_transform(payload.clone()).unwrap();
        assert_eq!(back, messages);

        let same: ChatPayload = default_output_transform(payload.clone()).unwrap();
        assert_eq!(same, payload);
    }

    #[test]
    fn test_unparseable_content_is_serialization_error() {
        let payload = ChatPayload::Message(ChatMessage::assistant("not json"));
        let err = default_output_transform::<Ticket>(payload).unwrap_err();
        assert!(matches!(err, OrchestrationError::Serialization(_)));
    }

    #[test]
    fn test_untagged_serde_shape() {
        let payload = ChatPayload::from("hello");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["content"], "hello");

        let list: ChatPayload =
            serde_json::from_value(serde_json::json!([{ "role": "user", "content": "x" }])).unwrap();
        assert_eq!(list.into_messages().len(), 1);
    }
}
