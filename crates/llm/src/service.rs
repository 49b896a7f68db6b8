//! Chat completion service contract
//!
//! Providers are external collaborators; this module only fixes the shape of
//! the capability and the structured-output contract layered on top of it.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::message::{ChatHistory, ChatMessage, MessageDelta};
use crate::settings::{ExecutionSettings, ResponseFormat};

/// Errors surfaced by chat completion services
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Service returned no content")]
    EmptyResponse,

    #[error("Response does not match {schema}: {reason}")]
    StructuredOutput { schema: String, reason: String },

    #[error("Stream interrupted: {0}")]
    Stream(String),
}

/// Opaque chat completion capability
#[async_trait]
pub trait ChatCompletionService: Send + Sync {
    /// Identifier used in logs
    fn service_id(&self) -> &str {
        "chat-completion"
    }

    async fn get_response(
        &self,
        history: &ChatHistory,
        settings: &ExecutionSettings,
    ) -> Result<ChatMessage, ServiceError>;

    /// Streamed variant. Services without native streaming yield the full
    /// response as one delta.
    async fn get_streaming_response(
        &self,
        history: &ChatHistory,
        settings: &ExecutionSettings,
    ) -> Result<BoxStream<'static, Result<MessageDelta, ServiceError>>, ServiceError> {
        let message = self.get_response(history, settings).await?;
        Ok(stream::once(async move { Ok(MessageDelta::from(message)) }).boxed())
    }
}

/// Drain a delta stream into a single message
pub async fn collect_stream(
    mut deltas: BoxStream<'static, Result<MessageDelta, ServiceError>>,
) -> Result<ChatMessage, ServiceError> {
    let mut collected = Vec::new();
    while let Some(delta) = deltas.next().await {
        collected.push(delta?);
    }
    if collected.is_empty() {
        return Err(ServiceError::EmptyResponse);
    }
    Ok(MessageDelta::merge(collected))
}

/// Request a response constrained to `T`'s schema and parse it strictly.
///
/// `settings.response_format` is overwritten with the schema of `T`. A body
/// that does not deserialize into `T` is a hard error; nothing is retried.
pub async fn get_structured_response<T>(
    service: &dyn ChatCompletionService,
    history: &ChatHistory,
    settings: &ExecutionSettings,
) -> Result<T, ServiceError>
where
    T: DeserializeOwned + JsonSchema,
{
    let format = ResponseFormat::for_type::<T>();
    let schema_name = format.name.clone();
    let settings = settings.clone().with_response_format(format);

    let response = service.get_response(history, &settings).await?;
    debug!(
        service = service.service_id(),
        schema = %schema_name,
        length = response.content.len(),
        "Structured response received"
    );

    parse_structured(&response.content).map_err(|reason| {
        warn!(schema = %schema_name, error = %reason, "Malformed structured response");
        ServiceError::StructuredOutput {
            schema: schema_name,
            reason,
        }
    })
}

/// Parse a JSON body, tolerating a surrounding markdown code fence only.
pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let body = strip_code_fence(content.trim());
    if body.is_empty() {
        return Err("empty body".to_string());
    }
    serde_json::from_str(body).map_err(|e| e.to_string())
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Pick {
        result: String,
        reason: String,
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl ChatCompletionService for Fixed {
        async fn get_response(
            &self,
            _history: &ChatHistory,
            settings: &ExecutionSettings,
        ) -> Result<ChatMessage, ServiceError> {
            assert!(settings.response_format.is_some());
            Ok(ChatMessage::assistant(self.0))
        }
    }

    #[tokio::test]
    async fn test_structured_response_accepts_fenced_json() {
        let service = Fixed("```json\n{\"result\": \"writer\", \"reason\": \"next\"}\n```");
        let pick: Pick =
            get_structured_response(&service, &ChatHistory::new(), &ExecutionSettings::default())
                .await
                .unwrap();
        assert_eq!(pick.result, "writer");
    }

    #[tokio::test]
    async fn test_structured_response_rejects_malformed_body() {
        let service = Fixed("the writer should go next");
        let err = get_structured_response::<Pick>(
            &service,
            &ChatHistory::new(),
            &ExecutionSettings::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::StructuredOutput { .. }));
    }

    #[tokio::test]
    async fn test_default_streaming_yields_single_delta() {
        let service = Fixed("{}");
        let settings = ExecutionSettings::default().with_response_format(ResponseFormat {
            name: "any".into(),
            schema: serde_json::json!({}),
        });
        let stream = service
            .get_streaming_response(&ChatHistory::new(), &settings)
            .await
            .unwrap();
        let message = collect_stream(stream).await.unwrap();
        assert_eq!(message.content, "{}");
    }
}
