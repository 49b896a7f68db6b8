//! Environment configuration helpers
//!
//! Configuration structs across the workspace are plain `Default` structs with a
//! `from_env()` constructor layered on top of these helpers. Values that are
//! present but unparsable are reported instead of silently replaced.

use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

static DOTENV: Once = Once::new();

/// Configuration loading errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Load `.env` from the working directory once per process.
pub fn load_dotenv() {
    DOTENV.call_once(|| match dotenv::dotenv() {
        Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
        Err(_) => debug!("No .env file found"),
    });
}

/// Read `key` and parse it, falling back to `default` when unset.
pub fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Boolean flag accepting `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    let raw = match std::env::var(key) {
        Ok(raw) => raw,
        Err(_) => return Ok(default),
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Duration expressed in milliseconds.
pub fn env_duration_ms(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = env_or::<u64>(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", true)]
    #[case("TRUE", true)]
    #[case("on", true)]
    #[case("no", false)]
    #[case("0", false)]
    fn test_env_bool_accepts_common_spellings(#[case] raw: &str, #[case] expected: bool) {
        let key = format!("COMMON_TEST_BOOL_{}", raw.to_ascii_uppercase());
        std::env::set_var(&key, raw);
        assert_eq!(env_bool(&key, !expected), Ok(expected));
        std::env::remove_var(&key);
    }

    #[test]
    fn test_env_bool_rejects_garbage() {
        std::env::set_var("COMMON_TEST_BOOL_GARBAGE", "maybe");
        let err = env_bool("COMMON_TEST_BOOL_GARBAGE", true).unwrap_err();
        assert!(err.to_string().contains("COMMON_TEST_BOOL_GARBAGE"));
        std::env::remove_var("COMMON_TEST_BOOL_GARBAGE");
    }

    #[test]
    fn test_env_or_uses_default_when_unset() {
        assert_eq!(env_or("COMMON_TEST_UNSET_NUMBER", 7u32), Ok(7));
    }

    #[test]
    fn test_env_duration_ms_parses_millis() {
        std::env::set_var("COMMON_TEST_DURATION", "250");
        assert_eq!(
            env_duration_ms("COMMON_TEST_DURATION", Duration::from_secs(1)),
            Ok(Duration::from_millis(250))
        );
        std::env::remove_var("COMMON_TEST_DURATION");
    }
}
