use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Constrains a response body to a JSON schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    pub name: String,
    pub schema: Value,
}

impl ResponseFormat {
    /// Schema derived from `T`'s `JsonSchema` impl
    pub fn for_type<T: JsonSchema>() -> Self {
        let schema = schemars::schema_for!(T);
        let name = schema
            .schema
            .metadata
            .as_ref()
            .and_then(|meta| meta.title.clone())
            .unwrap_or_else(|| short_type_name::<T>().to_string());

        Self {
            name,
            // RootSchema always serializes; fall back to an open schema just in case
            schema: serde_json::to_value(&schema).unwrap_or(Value::Object(Default::default())),
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Request settings passed through to a chat completion service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Provider specific knobs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extension: HashMap<String, Value>,
}

impl ExecutionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extension.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(JsonSchema, Deserialize)]
    #[allow(dead_code)]
    struct Verdict {
        result: bool,
        reason: String,
    }

    #[test]
    fn test_response_format_carries_schema_properties() {
        let format = ResponseFormat::for_type::<Verdict>();
        assert_eq!(format.name, "Verdict");
        assert!(format.schema["properties"]["result"].is_object());
        assert!(format.schema["properties"]["reason"].is_object());
    }
}
