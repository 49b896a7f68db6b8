use common::{env_bool, env_duration_ms, load_dotenv, ConfigError};
use std::time::Duration;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// When `false`, the first handler error raised during publish delivery is
    /// returned from the next `stop()` / `stop_when_idle()`
    pub ignore_unhandled_exceptions: bool,
    /// Upper bound for each actor's `close()` during runtime shutdown
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ignore_unhandled_exceptions: true,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl RuntimeConfig {
    /// `RUNTIME_IGNORE_UNHANDLED_EXCEPTIONS`, `RUNTIME_SHUTDOWN_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        let defaults = Self::default();
        Ok(Self {
            ignore_unhandled_exceptions: env_bool(
                "RUNTIME_IGNORE_UNHANDLED_EXCEPTIONS",
                defaults.ignore_unhandled_exceptions,
            )?,
            shutdown_timeout: env_duration_ms(
                "RUNTIME_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout,
            )?,
        })
    }

    pub fn propagating_handler_errors() -> Self {
        Self {
            ignore_unhandled_exceptions: false,
            ..Self::default()
        }
    }
}
