//! Shared plumbing for the orchestration workspace: logging bootstrap and
//! environment-driven configuration helpers.

pub mod config;
pub mod logging;

pub use config::{env_bool, env_duration_ms, env_or, load_dotenv, ConfigError};
pub use logging::{init_logging, JsonLayer, LoggingConfig, OperationTimer, StructuredLogEntry};
