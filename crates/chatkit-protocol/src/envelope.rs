//! Message types exchanged between the host page and the ChatKit frame.
//!
//! # Message Flow
//!
//! **Requests** (carry a fresh [`Nonce`]):
//! - `command`: invoke a named handler on the other side
//! - `fetch`: run an HTTP request on the other side and return its JSON body
//! - `fetchEventSource`: open an SSE stream on the other side
//!
//! **Replies** (echo the request nonce):
//! - `response`: terminal result or error for a request
//! - `fetchEventSourceMessage`: one pushed SSE message, zero or more per stream
//!
//! **Uncorrelated**:
//! - `abortSignal`: cancel the operation started under a nonce
//! - `event`: fire-and-forget notification

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};
use crate::form::FormFields;

/// Field that marks a posted object as belonging to this protocol.
pub const MARKER_KEY: &str = "__xpaiChatKit";

/// Target origin that matches any receiving window.
pub const WILDCARD_ORIGIN: &str = "*";

/// Correlation identifier linking a request to its replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    /// Generate a fresh random nonce.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the nonce text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Nonce {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Nonce {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Nonce {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Clonable subset of `RequestInit` sent with proxied requests.
///
/// Signals and `FormData` bodies never appear here; see [`FrameMessage::Fetch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParams {
    /// HTTP method, `GET` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl RequestParams {
    /// Method to use, defaulting to `GET`.
    #[must_use]
    pub fn method_or_default(&self) -> &str {
        self.method.as_deref().unwrap_or("GET")
    }
}

/// One message of a server-sent event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSourceMessage {
    /// Last `id:` field, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `event:` field, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Concatenated `data:` lines.
    #[serde(default)]
    pub data: String,
    /// `retry:` field in milliseconds, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

/// Tagged union of every message kind on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FrameMessage {
    /// Invoke the `command` handler on the receiving side.
    Command {
        nonce: Nonce,
        command: String,
        #[serde(default)]
        data: Value,
    },

    /// Terminal reply to a request.
    Response {
        nonce: Nonce,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },

    /// Run an HTTP request on the receiving side.
    Fetch {
        nonce: Nonce,
        url: String,
        #[serde(default)]
        params: RequestParams,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form_data: Option<FormFields>,
    },

    /// Abort the operation started under `nonce`.
    AbortSignal {
        nonce: Nonce,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<Value>,
    },

    /// Open a server-sent event stream on the receiving side.
    FetchEventSource {
        nonce: Nonce,
        url: String,
        #[serde(default)]
        params: RequestParams,
    },

    /// One message pushed from a stream opened with `fetchEventSource`.
    FetchEventSourceMessage {
        nonce: Nonce,
        message: EventSourceMessage,
    },

    /// Fire-and-forget notification.
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

impl FrameMessage {
    /// Wire name of the message kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Response { .. } => "response",
            Self::Fetch { .. } => "fetch",
            Self::AbortSignal { .. } => "abortSignal",
            Self::FetchEventSource { .. } => "fetchEventSource",
            Self::FetchEventSourceMessage { .. } => "fetchEventSourceMessage",
            Self::Event { .. } => "event",
        }
    }

    /// Correlation nonce, `None` for events.
    #[must_use]
    pub const fn nonce(&self) -> Option<&Nonce> {
        match self {
            Self::Command { nonce, .. }
            | Self::Response { nonce, .. }
            | Self::Fetch { nonce, .. }
            | Self::AbortSignal { nonce, .. }
            | Self::FetchEventSource { nonce, .. }
            | Self::FetchEventSourceMessage { nonce, .. } => Some(nonce),
            Self::Event { .. } => None,
        }
    }
}

/// A [`FrameMessage`] stamped with the protocol marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "__xpaiChatKit")]
    marker: bool,
    /// The carried message.
    #[serde(flatten)]
    pub message: FrameMessage,
}

impl Envelope {
    /// Wrap a message for posting.
    #[must_use]
    pub const fn new(message: FrameMessage) -> Self {
        Self {
            marker: true,
            message,
        }
    }

    /// Serialize to the object that is posted across the boundary.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encoding`] if a carried value cannot be represented as JSON.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        serde_json::to_value(self).map_err(|e| ProtocolError::encoding(e.to_string()))
    }

    /// Decode posted data.
    ///
    /// Returns `Ok(None)` for traffic that is not ours: non-objects and objects
    /// whose marker is absent or not `true`. Those are ignored, not errors.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedEnvelope`] when the marker is present but
    /// the message does not decode.
    pub fn from_value(data: Value) -> ProtocolResult<Option<FrameMessage>> {
        let is_ours = data
            .as_object()
            .and_then(|object| object.get(MARKER_KEY))
            .is_some_and(|marker| marker == &Value::Bool(true));
        if !is_ours {
            return Ok(None);
        }

        serde_json::from_value(data)
            .map(Some)
            .map_err(|e| ProtocolError::malformed_envelope(e.to_string()))
    }
}

/// Wire name for an outward command: `submit` becomes `onSubmit`.
#[must_use]
pub fn command_wire_name(command: &str) -> String {
    let mut chars = command.chars();
    chars.next().map_or_else(
        || "on".to_string(),
        |first| format!("on{}{}", first.to_uppercase(), chars.as_str()),
    )
}

/// Leaf name for a wire command: `onSubmit` becomes `submit`.
///
/// Returns `None` when the name does not follow the `on<Upper>` convention.
#[must_use]
pub fn command_leaf_name(wire_name: &str) -> Option<String> {
    let rest = wire_name.strip_prefix("on")?;
    let mut chars = rest.chars();
    let first = chars.next().filter(|c| c.is_uppercase())?;
    Some(format!("{}{}", first.to_lowercase(), chars.as_str()))
}
