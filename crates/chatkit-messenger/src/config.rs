//! Configuration for a messenger.

use std::path::Path;
use std::time::Duration;

use chatkit_protocol::{RetryPolicy, WILDCARD_ORIGIN};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a [`Messenger`](crate::Messenger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessengerConfig {
    /// Origin messages are posted to and accepted from. `"*"` accepts any.
    #[serde(default = "default_target_origin")]
    pub target_origin: String,

    /// Reconnect policy for proxied event streams.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Deadline for a proxied fetch served by this side. `None` waits forever.
    #[serde(
        default,
        rename = "request_timeout_ms",
        with = "optional_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_timeout: Option<Duration>,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            target_origin: default_target_origin(),
            retry: RetryPolicy::default(),
            request_timeout: None,
        }
    }
}

impl MessengerConfig {
    /// Config for a known target origin.
    pub fn with_target_origin(origin: impl Into<String>) -> Self {
        Self {
            target_origin: origin.into(),
            ..Default::default()
        }
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the served request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Whether any origin is accepted.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.target_origin == WILDCARD_ORIGIN
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `CHATKIT_TARGET_ORIGIN`, `CHATKIT_RETRY_BASE_MS`,
    /// `CHATKIT_RETRY_MAX_MS`, `CHATKIT_RETRY_ATTEMPTS` and
    /// `CHATKIT_REQUEST_TIMEOUT_MS`. Unset variables keep their defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a variable that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a variable that does not parse.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(origin) = lookup("CHATKIT_TARGET_ORIGIN") {
            config.target_origin = origin;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CHATKIT_RETRY_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CHATKIT_RETRY_MAX_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "CHATKIT_RETRY_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CHATKIT_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Some(Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// Load configuration from a file, JSON by extension and TOML otherwise.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::parse(e.to_string()))
        } else {
            toml::from_str(&content)
                .map_err(|e| ConfigError::parse(format!("Failed to parse config: {e}")))
        }
    }
}

fn default_target_origin() -> String {
    WILDCARD_ORIGIN.to_string()
}

fn parse_var<T, L>(lookup: &L, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(name, e.to_string()))
        })
        .transpose()
}

/// Serialization helper for `Option<Duration>` as milliseconds.
mod optional_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer
                .serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
