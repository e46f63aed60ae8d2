//! ChatKit protocol - wire format for the host/frame messenger
//!
//! This crate holds the plain-data half of the ChatKit frame bridge: everything
//! that has to survive a trip through the structured-clone boundary between a
//! host page and the embedded ChatKit frame.
//!
//! # Protocol
//!
//! Every message posted over the channel is a JSON object carrying the
//! protocol marker and a `type` tag:
//!
//! ```text
//! { "__xpaiChatKit": true, "type": "command", "nonce": "<uuid>", "command": "onSubmit", "data": {...} }
//! { "__xpaiChatKit": true, "type": "response", "nonce": "<uuid>", "response": ..., "error": ... }
//! { "__xpaiChatKit": true, "type": "event", "event": "<name>", "data": ... }
//! ```
//!
//! Request-like kinds (`command`, `fetch`, `fetchEventSource`) carry a nonce,
//! `response` echoes it, and `event` is uncorrelated.
//!
//! # Modules
//!
//! - [`envelope`]: tagged message union and marker handling
//! - [`error`]: native errors and their frame-safe twins
//! - [`capabilities`]: allow/deny capability profiles
//! - [`retry`]: half-jitter exponential backoff
//! - [`form`]: `FormData` and its clonable field mapping
//! - [`encoding`]: base64url frame parameters
//!
//! # Example
//!
//! ```rust
//! use chatkit_protocol::{Envelope, FrameMessage, Nonce, command_wire_name};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let envelope = Envelope::new(FrameMessage::Command {
//!     nonce: Nonce::new(),
//!     command: command_wire_name("submit"),
//!     data: json!({ "text": "hi" }),
//! });
//!
//! let wire = envelope.to_value()?;
//! assert_eq!(wire["command"], "onSubmit");
//!
//! let decoded = Envelope::from_value(wire)?;
//! assert_eq!(decoded, Some(envelope.message));
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod capabilities;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod form;
pub mod retry;

pub use capabilities::{Capabilities, CapabilityGate, CapabilityKey, Profile, Rules};
pub use encoding::{FrameParams, decode_base64, decode_frame_params, encode_base64, frame_url};
pub use envelope::{
    EventSourceMessage, Envelope, FrameMessage, MARKER_KEY, Nonce, RequestParams,
    WILDCARD_ORIGIN, command_leaf_name, command_wire_name,
};
pub use error::{
    ChatKitError, ErrorKind, FRAME_SAFE_ERROR_KEY, FrameSafeError, ProtocolError,
    ProtocolResult, ResponseMetadata,
};
pub use form::{FileBlob, FormData, FormFields, FormValue};
pub use retry::{
    BASE_RETRY_DELAY, MAX_RETRY_ATTEMPTS, MAX_RETRY_DELAY, RetryPolicy, RetryState,
};
