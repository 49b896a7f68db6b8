//! Structured logging bootstrap
//!
//! Human-readable output for development, one JSON object per event for
//! production. Initialization is idempotent so tests and embedding
//! applications can call it freely.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Write};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::{env_bool, env_or, load_dotenv, ConfigError};

/// One JSON log line
///
/// `agent_id`, `topic` and `orchestration` are top-level keys; every other
/// event field lands in `fields`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<String>,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of the pretty formatter
    pub json: bool,
    /// ANSI colors (pretty formatter only)
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            color: true,
        }
    }
}

impl LoggingConfig {
    /// `LOG_LEVEL`, `LOG_JSON`, `LOG_COLOR`
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        let defaults = Self::default();
        Ok(Self {
            level: env_or("LOG_LEVEL", defaults.level)?,
            json: env_bool("LOG_JSON", defaults.json)?,
            color: env_bool("LOG_COLOR", defaults.color)?,
        })
    }
}

/// Writes every event as one [`StructuredLogEntry`] line
pub struct JsonLayer<W> {
    make_writer: W,
}

impl<W> JsonLayer<W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    pub fn new(make_writer: W) -> Self {
        Self { make_writer }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let entry = StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            agent_id: visitor.agent_id,
            topic: visitor.topic,
            orchestration: visitor.orchestration,
            fields: visitor.fields,
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(self.make_writer.make_writer(), "{}", json);
        }
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    agent_id: Option<String>,
    topic: Option<String>,
    orchestration: Option<String>,
    fields: HashMap<String, Value>,
}

impl JsonVisitor {
    fn record_text(&mut self, field: &Field, text: String) {
        match field.name() {
            "message" => self.message = Some(text),
            "agent_id" => self.agent_id = Some(text),
            "topic" => self.topic = Some(text),
            "orchestration" => self.orchestration = Some(text),
            name => {
                self.fields.insert(name.to_string(), Value::String(text));
            }
        }
    }

    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_text(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_text(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}

/// Install the global subscriber. Returns `false` when one was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        Registry::default()
            .with(env_filter)
            .with(JsonLayer::new(io::stdout))
            .try_init()
            .is_ok()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(config.color);

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    }
}

/// Logs the duration of an operation when finished
pub struct OperationTimer {
    start: std::time::Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation_name: operation_name.into(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        let duration_ms = self.elapsed_ms();

        match result {
            Ok(_) => {
                tracing::info!(
                    operation = %self.operation_name,
                    duration_ms = duration_ms,
                    success = true,
                    "Operation completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    operation = %self.operation_name,
                    duration_ms = duration_ms,
                    success = false,
                    error = %e,
                    "Operation failed"
                );
            }
        }
    }
}
