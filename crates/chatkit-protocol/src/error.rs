//! Error types for the ChatKit protocol.
//!
//! [`ChatKitError`] is the native error: it keeps a `cause` chain and is what
//! local code matches on. [`FrameSafeError`] is its plain-data twin, the only
//! shape that is allowed to cross the frame boundary.

use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Marker field naming the error kind on a frame-safe error.
pub const FRAME_SAFE_ERROR_KEY: &str = "__chatkit_error__";

/// Result type for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Failures in the protocol layer itself, never sent across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Marked message that does not decode into any known kind.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// Value that cannot be encoded or decoded.
    #[error("encoding failed: {reason}")]
    Encoding { reason: String },

    /// Capability profile name with no rule set.
    #[error("unknown capability profile: {name}")]
    UnknownProfile { name: String },

    /// URL that cannot be parsed or carry frame parameters.
    #[error("invalid url: {reason}")]
    InvalidUrl { reason: String },
}

impl ProtocolError {
    /// Create a malformed envelope error.
    pub fn malformed_envelope(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    /// Create an encoding error.
    pub fn encoding(reason: impl Into<String>) -> Self {
        Self::Encoding {
            reason: reason.into(),
        }
    }

    /// Create an unknown profile error.
    pub fn unknown_profile(name: impl Into<String>) -> Self {
        Self::UnknownProfile { name: name.into() }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            reason: reason.into(),
        }
    }
}

/// Every error kind that can round-trip through the frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    Integration,
    Http,
    Stream,
    StreamEventParsing,
    StreamEventHandling,
    StreamStop,
    ThreadRendering,
    HistoryView,
    EntitySearch,
    WidgetItem,
    InitialThreadLoad,
    FileAttachment,
    Unhandled,
    UnhandledPromiseRejection,
    Intl,
    DomainVerificationRequest,
    Network,
    FatalApp,
    App,
}

impl ErrorKind {
    /// All kinds, integration and HTTP first.
    pub const ALL: [Self; 19] = [
        Self::Integration,
        Self::Http,
        Self::Stream,
        Self::StreamEventParsing,
        Self::StreamEventHandling,
        Self::StreamStop,
        Self::ThreadRendering,
        Self::HistoryView,
        Self::EntitySearch,
        Self::WidgetItem,
        Self::InitialThreadLoad,
        Self::FileAttachment,
        Self::Unhandled,
        Self::UnhandledPromiseRejection,
        Self::Intl,
        Self::DomainVerificationRequest,
        Self::Network,
        Self::FatalApp,
        Self::App,
    ];

    /// Canonical kind name, as written into the frame-safe marker.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integration => "IntegrationError",
            Self::Http => "HttpError",
            Self::Stream => "StreamError",
            Self::StreamEventParsing => "StreamEventParsingError",
            Self::StreamEventHandling => "StreamEventHandlingError",
            Self::StreamStop => "StreamStopError",
            Self::ThreadRendering => "ThreadRenderingError",
            Self::HistoryView => "HistoryViewError",
            Self::EntitySearch => "EntitySearchError",
            Self::WidgetItem => "WidgetItemError",
            Self::InitialThreadLoad => "InitialThreadLoadError",
            Self::FileAttachment => "FileAttachmentError",
            Self::Unhandled => "UnhandledError",
            Self::UnhandledPromiseRejection => "UnhandledPromiseRejectionError",
            Self::Intl => "IntlError",
            Self::DomainVerificationRequest => "DomainVerificationRequestError",
            Self::Network => "NetworkError",
            Self::FatalApp => "FatalAppError",
            Self::App => "AppError",
        }
    }

    /// Look a kind up by its canonical name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Fixed prefix applied to wrapped messages of this kind.
    #[must_use]
    pub const fn message_prefix(self) -> Option<&'static str> {
        match self {
            Self::StreamEventParsing => Some("Failed to parse stream event"),
            Self::StreamEventHandling => Some("Failed to handle stream event"),
            Self::StreamStop => Some("Failed to stop stream"),
            Self::HistoryView => Some("Failed to load conversation"),
            Self::InitialThreadLoad => Some("Failed to load initial thread"),
            Self::FileAttachment => Some("Failed to upload file"),
            Self::Intl => Some("Intl error"),
            _ => None,
        }
    }

    /// Whether the kind belongs to the wrapped-error family.
    #[must_use]
    pub const fn is_wrapped(self) -> bool {
        !matches!(self, Self::Integration | Self::Http)
    }

    /// Event name used when reporting the error: `StreamEventParsingError`
    /// becomes `error.streamEventParsing`.
    #[must_use]
    pub fn event_name(self) -> String {
        let name = self.name();
        let stem = name.strip_suffix("Error").unwrap_or(name);
        let mut chars = stem.chars();
        chars.next().map_or_else(
            || "error.app".to_string(),
            |first| format!("error.{}{}", first.to_lowercase(), chars.as_str()),
        )
    }

    /// Apply the kind's prefix unless the message already carries it.
    #[must_use]
    pub fn prefixed(self, message: &str) -> String {
        match self.message_prefix() {
            Some(prefix) => {
                let prefix = format!("{prefix}: ");
                if message.starts_with(&prefix) {
                    message.to_string()
                } else {
                    format!("{prefix}{message}")
                }
            }
            None => message.to_string(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Response metadata attached to HTTP failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Value of the `x-request-id` response header.
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Any other metadata fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResponseMetadata {
    /// Metadata carrying only a request id.
    #[must_use]
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            extra: Map::new(),
        }
    }
}

/// Plain-data error that survives structured cloning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSafeError {
    /// Canonical kind name.
    #[serde(rename = "__chatkit_error__")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FrameSafeError {
    /// Read a frame-safe error out of an arbitrary value.
    ///
    /// Returns `None` unless the value is an object whose marker field is a string.
    #[must_use]
    pub fn parse(value: &Value) -> Option<Self> {
        let marker = value.as_object()?.get(FRAME_SAFE_ERROR_KEY)?;
        if !marker.is_string() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Plain JSON object form.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut object = Map::new();
        object.insert(FRAME_SAFE_ERROR_KEY.to_string(), Value::String(self.kind));
        object.insert("message".to_string(), Value::String(self.message));
        if let Some(stack) = self.stack {
            object.insert("stack".to_string(), Value::String(stack));
        }
        if let Some(status) = self.status {
            object.insert("status".to_string(), Value::from(status));
        }
        if let Some(status_text) = self.status_text {
            object.insert("statusText".to_string(), Value::String(status_text));
        }
        if let Some(metadata) = self.metadata {
            let mut fields = metadata.extra;
            if let Some(request_id) = metadata.request_id {
                fields.insert("requestId".to_string(), Value::String(request_id));
            }
            object.insert("metadata".to_string(), Value::Object(fields));
        }
        if let Some(code) = self.code {
            object.insert("code".to_string(), Value::String(code));
        }
        Value::Object(object)
    }
}

type Cause = Arc<dyn StdError + Send + Sync + 'static>;
type Decoder = fn(&FrameSafeError) -> Option<ChatKitError>;

/// Decoders tried in order when classifying a value from the other side.
const DECODERS: [Decoder; 3] = [decode_integration, decode_http, decode_wrapped];

/// Native ChatKit error.
#[derive(Debug, Clone)]
pub struct ChatKitError {
    kind: ErrorKind,
    message: String,
    stack: Option<String>,
    remote_stack: Option<String>,
    status: Option<u16>,
    status_text: Option<String>,
    metadata: Option<ResponseMetadata>,
    code: Option<String>,
    cause: Option<Cause>,
}

impl ChatKitError {
    /// Create an error of `kind`, applying the kind's message prefix.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl AsRef<str>) -> Self {
        let message = kind.prefixed(message.as_ref());
        let stack = Some(format_stack(kind, &message, Location::caller()));
        Self {
            kind,
            message,
            stack,
            remote_stack: None,
            status: None,
            status_text: None,
            metadata: None,
            code: None,
            cause: None,
        }
    }

    /// Caller misuse of the public API.
    #[track_caller]
    pub fn integration(message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::Integration, message)
    }

    /// Non-2xx response from a proxied fetch.
    #[track_caller]
    pub fn http(message: impl AsRef<str>, status: u16, status_text: impl Into<String>) -> Self {
        let mut error = Self::new(ErrorKind::Http, message);
        error.status = Some(status);
        error.status_text = Some(status_text.into());
        error
    }

    /// Wrap `original` as `kind`, keeping it as the cause.
    ///
    /// When `original` is itself a [`ChatKitError`], its stack and response
    /// metadata carry over so the report still points at the origin.
    #[track_caller]
    pub fn wrap<E>(kind: ErrorKind, original: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let mut error = Self::new(kind, original.to_string());
        let erased: &(dyn StdError + 'static) = &original;
        if let Some(inner) = erased.downcast_ref::<Self>() {
            if inner.stack.is_some() {
                error.stack.clone_from(&inner.stack);
            }
            if inner.metadata.is_some() {
                error.metadata.clone_from(&inner.metadata);
            }
        }
        error.cause = Some(Arc::new(original));
        error
    }

    /// Attach response metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach an error code (used by [`ErrorKind::Intl`]).
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Replace the stack with one pointing at `location`.
    ///
    /// The previous stack, typically captured on the other side of the
    /// boundary, is kept as [`remote_stack`](Self::remote_stack).
    #[must_use]
    pub fn with_call_site(mut self, location: &Location<'_>) -> Self {
        self.remote_stack = self.stack.take();
        self.stack = Some(format_stack(self.kind, &self.message, location));
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Canonical kind name, e.g. `HttpError`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Event name for reporting, e.g. `error.streamEventParsing`.
    #[must_use]
    pub fn event_name(&self) -> String {
        self.kind.event_name()
    }

    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Stack captured where the error originated, after [`with_call_site`](Self::with_call_site).
    #[must_use]
    pub fn remote_stack(&self) -> Option<&str> {
        self.remote_stack.as_deref()
    }

    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    #[must_use]
    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    #[must_use]
    pub const fn metadata(&self) -> Option<&ResponseMetadata> {
        self.metadata.as_ref()
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.request_id.as_deref()
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Snapshot into the plain-data form.
    #[must_use]
    pub fn to_frame_safe(&self) -> FrameSafeError {
        let is_http = self.kind == ErrorKind::Http;
        FrameSafeError {
            kind: self.kind.name().to_string(),
            message: self.message.clone(),
            stack: self.stack.clone(),
            status: self.status.filter(|_| is_http),
            status_text: self.status_text.clone().filter(|_| is_http),
            metadata: self.metadata.clone(),
            code: self.code.clone(),
        }
    }

    /// Snapshot into the JSON object sent in a `response` envelope.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.to_frame_safe().into_value()
    }

    /// Rebuild a native error from a value received over the boundary.
    ///
    /// Tries integration, then HTTP, then the wrapped family. Returns `None`
    /// for any value without a recognized marker; callers keep such values as-is.
    #[must_use]
    pub fn from_possible_frame_safe_error(value: &Value) -> Option<Self> {
        let safe = FrameSafeError::parse(value)?;
        DECODERS.iter().find_map(|decode| decode(&safe))
    }

    fn from_frame_safe(kind: ErrorKind, safe: &FrameSafeError) -> Self {
        Self {
            kind,
            message: kind.prefixed(&safe.message),
            stack: safe.stack.clone(),
            remote_stack: None,
            status: None,
            status_text: None,
            metadata: safe.metadata.clone(),
            code: safe.code.clone(),
            cause: None,
        }
    }
}

impl fmt::Display for ChatKitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for ChatKitError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

fn decode_integration(safe: &FrameSafeError) -> Option<ChatKitError> {
    (safe.kind == ErrorKind::Integration.name())
        .then(|| ChatKitError::from_frame_safe(ErrorKind::Integration, safe))
}

fn decode_http(safe: &FrameSafeError) -> Option<ChatKitError> {
    (safe.kind == ErrorKind::Http.name()).then(|| {
        let mut error = ChatKitError::from_frame_safe(ErrorKind::Http, safe);
        error.status = safe.status;
        error.status_text.clone_from(&safe.status_text);
        error
    })
}

fn decode_wrapped(safe: &FrameSafeError) -> Option<ChatKitError> {
    ErrorKind::from_name(&safe.kind)
        .filter(|kind| kind.is_wrapped())
        .map(|kind| ChatKitError::from_frame_safe(kind, safe))
}

fn format_stack(kind: ErrorKind, message: &str, location: &Location<'_>) -> String {
    format!(
        "{}: {}\n    at {}:{}:{}",
        kind.name(),
        message,
        location.file(),
        location.line(),
        location.column()
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ErrorKind::from_name("TypeError"), None);
    }

    #[test]
    fn test_event_name_strips_suffix_and_lowercases() {
        assert_eq!(
            ErrorKind::StreamEventParsing.event_name(),
            "error.streamEventParsing"
        );
        assert_eq!(ErrorKind::Http.event_name(), "error.http");
        assert_eq!(ErrorKind::App.event_name(), "error.app");
    }

    #[test]
    fn test_prefix_is_applied_once() {
        let error = ChatKitError::new(ErrorKind::StreamEventParsing, "bad json");
        assert_eq!(error.message(), "Failed to parse stream event: bad json");

        let again = ChatKitError::new(ErrorKind::StreamEventParsing, error.message());
        assert_eq!(again.message(), "Failed to parse stream event: bad json");
    }

    #[test]
    fn test_kinds_without_prefix_keep_message() {
        let error = ChatKitError::new(ErrorKind::Network, "offline");
        assert_eq!(error.message(), "offline");
        assert_eq!(error.to_string(), "offline");
    }

    #[test]
    fn test_stack_points_at_constructor_call_site() {
        let error = ChatKitError::integration("misuse");
        let stack = error.stack().unwrap();
        assert!(stack.starts_with("IntegrationError: misuse"));
        assert!(stack.contains(file!()));
    }

    #[test]
    fn test_wrap_preserves_stack_and_metadata_of_inner_error() {
        let inner = ChatKitError::http("boom", 500, "Internal Server Error")
            .with_metadata(ResponseMetadata::with_request_id("req_1"));
        let inner_stack = inner.stack().map(str::to_string);

        let wrapped = ChatKitError::wrap(ErrorKind::HistoryView, inner);

        assert_eq!(wrapped.message(), "Failed to load conversation: boom");
        assert_eq!(wrapped.stack().map(str::to_string), inner_stack);
        assert_eq!(wrapped.request_id(), Some("req_1"));
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn test_wrap_foreign_error_keeps_cause() {
        let io = std::io::Error::other("disk full");
        let wrapped = ChatKitError::wrap(ErrorKind::FileAttachment, io);

        assert_eq!(wrapped.message(), "Failed to upload file: disk full");
        assert_eq!(wrapped.source().unwrap().to_string(), "disk full");
    }

    #[test]
    fn test_http_frame_safe_shape() {
        let error = ChatKitError::http("not found", 404, "Not Found")
            .with_metadata(ResponseMetadata::with_request_id("req_9"));

        let value = error.to_value();

        assert_eq!(value[FRAME_SAFE_ERROR_KEY], "HttpError");
        assert_eq!(value["message"], "not found");
        assert_eq!(value["status"], 404);
        assert_eq!(value["statusText"], "Not Found");
        assert_eq!(value["metadata"]["requestId"], "req_9");
        assert!(value["stack"].as_str().unwrap().starts_with("HttpError"));
    }

    #[test]
    fn test_decode_restores_origin_stack() {
        let value = json!({
            "__chatkit_error__": "IntegrationError",
            "message": "nope",
            "stack": "IntegrationError: nope\n    at frame.rs:1:1"
        });

        let error = ChatKitError::from_possible_frame_safe_error(&value).unwrap();

        assert_eq!(error.kind(), ErrorKind::Integration);
        assert_eq!(error.stack(), Some("IntegrationError: nope\n    at frame.rs:1:1"));
    }

    #[test]
    fn test_unknown_marker_is_not_decoded() {
        let value = json!({ "__chatkit_error__": "TypeError", "message": "x" });
        assert!(ChatKitError::from_possible_frame_safe_error(&value).is_none());

        let value = json!({ "__chatkit_error__": 3, "message": "x" });
        assert!(ChatKitError::from_possible_frame_safe_error(&value).is_none());

        assert!(ChatKitError::from_possible_frame_safe_error(&json!("boom")).is_none());
    }

    #[test]
    fn test_with_call_site_moves_remote_stack() {
        let value = json!({
            "__chatkit_error__": "NetworkError",
            "message": "offline",
            "stack": "NetworkError: offline\n    at remote"
        });
        let error = ChatKitError::from_possible_frame_safe_error(&value).unwrap();

        let relocated = error.with_call_site(Location::caller());

        assert_eq!(
            relocated.remote_stack(),
            Some("NetworkError: offline\n    at remote")
        );
        assert!(relocated.stack().unwrap().contains(file!()));
    }

    #[test]
    fn test_intl_code_round_trips() {
        let error = ChatKitError::new(ErrorKind::Intl, "missing locale").with_code("E_LOCALE");
        let decoded = ChatKitError::from_possible_frame_safe_error(&error.to_value()).unwrap();

        assert_eq!(decoded.kind(), ErrorKind::Intl);
        assert_eq!(decoded.message(), "Intl error: missing locale");
        assert_eq!(decoded.code(), Some("E_LOCALE"));
    }

    #[test]
    fn test_protocol_error_display() {
        let error = ProtocolError::unknown_profile("agent");
        assert_eq!(error.to_string(), "unknown capability profile: agent");
    }
}
