//! Error types for the messenger crate.

use chatkit_protocol::{ChatKitError, ProtocolError};
use serde_json::Value;
use thiserror::Error;

/// Result type for messenger operations.
pub type Result<T> = std::result::Result<T, MessengerError>;

/// What a caller of the messenger sees when an operation fails.
#[derive(Debug, Clone, Error)]
pub enum MessengerError {
    /// Domain error, local or decoded from the other side.
    #[error(transparent)]
    ChatKit(#[from] ChatKitError),

    /// Error value from the other side with no recognized kind, kept as sent.
    #[error("remote error: {0}")]
    Remote(Value),

    /// The messenger was disconnected while the request was pending.
    #[error("messenger closed")]
    Closed,

    /// The target window could not be resolved when posting.
    #[error("target window is not available")]
    TargetUnavailable,

    /// `connect()` was called outside a Tokio runtime.
    #[error("no tokio runtime available to drive the messenger")]
    NoRuntime,

    /// A value could not be converted to or from JSON.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    /// Protocol-level failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MessengerError {
    /// Classify an `error` value received in a `response` envelope.
    #[must_use]
    pub fn from_remote(value: Value) -> Self {
        ChatKitError::from_possible_frame_safe_error(&value)
            .map_or(Self::Remote(value), Self::ChatKit)
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// The domain error, if this is one.
    #[must_use]
    pub const fn chatkit(&self) -> Option<&ChatKitError> {
        match self {
            Self::ChatKit(error) => Some(error),
            _ => None,
        }
    }

    /// Whether the operation ended because it was aborted.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Remote(value) => value
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| name == "AbortError"),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for MessengerError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

/// Failures of the HTTP layer behind a proxied fetch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The request was aborted through its signal.
    #[error("request aborted")]
    Aborted { reason: Value },

    /// The request could not be sent or the connection failed.
    #[error("network error: {reason}")]
    Network { reason: String },

    /// The response body could not be read.
    #[error("failed to read response body: {reason}")]
    Body { reason: String },

    /// The request could not be built.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl FetchError {
    /// Create a network error.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    /// Create a body error.
    pub fn body(reason: impl Into<String>) -> Self {
        Self::Body {
            reason: reason.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_builder() {
            Self::invalid_request(error.to_string())
        } else if error.is_body() || error.is_decode() {
            Self::body(error.to_string())
        } else {
            Self::network(error.to_string())
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    /// The file could not be parsed.
    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    /// A field holds an unusable value.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    /// Create a parse error.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use chatkit_protocol::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_from_remote_decodes_frame_safe_errors() {
        let value = ChatKitError::http("not found", 404, "Not Found").to_value();

        let error = MessengerError::from_remote(value);

        let chatkit = error.chatkit().unwrap();
        assert_eq!(chatkit.kind(), ErrorKind::Http);
        assert_eq!(chatkit.status(), Some(404));
    }

    #[test]
    fn test_from_remote_keeps_unknown_values() {
        let value = json!({ "name": "AbortError", "message": "aborted" });

        let error = MessengerError::from_remote(value.clone());

        assert!(matches!(&error, MessengerError::Remote(v) if v == &value));
        assert!(error.is_abort());
    }

    #[test]
    fn test_display_is_transparent_for_domain_errors() {
        let error = MessengerError::from(ChatKitError::integration("bad call"));
        assert_eq!(error.to_string(), "bad call");
        assert!(!error.is_abort());
    }
}
