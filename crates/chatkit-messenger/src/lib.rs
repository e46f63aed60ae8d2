//! ChatKit messenger - RPC, events and proxied HTTP across the frame boundary
//!
//! A [`Messenger`] is one endpoint of a `postMessage`-style channel between a
//! host page and the embedded ChatKit frame. Each side can:
//!
//! - call commands on the other side and await their response
//! - emit one-way events
//! - ask the other side to run a `fetch` or an event stream on its behalf,
//!   with `FormData` bodies and abort signals carried across
//!
//! # Architecture
//!
//! ```text
//! ┌──────────── host ────────────┐         ┌──────────── frame ───────────┐
//! │ ChatKitHost ─▶ Messenger     │ post    │ Messenger ─▶ CommandTable    │
//! │                 │ registry   │────────▶│    │ capability gate         │
//! │                 │ emitter    │◀────────│    │ HttpFetch ─▶ SSE relay  │
//! │                 ▼            │         │    ▼                         │
//! │              FrameWindow     │         │ FrameWindow                  │
//! └──────────────────────────────┘         └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use chatkit_messenger::{CommandTable, FrameWindow, Messenger, fixed_target};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let host = FrameWindow::new("https://host.example");
//! let frame = FrameWindow::new("https://frame.example");
//!
//! let frame_side = Messenger::builder(frame.clone(), fixed_target(host.clone()))
//!     .target_origin("https://host.example")
//!     .handlers(CommandTable::new().on("submit", |payload| async move { Ok(payload.data) }))
//!     .build();
//! let host_side = Messenger::builder(host, fixed_target(frame))
//!     .target_origin("https://frame.example")
//!     .build();
//! frame_side.connect()?;
//! host_side.connect()?;
//!
//! let echoed = host_side.command("submit", json!({ "text": "hi" }))?.await?;
//! assert_eq!(echoed, json!({ "text": "hi" }));
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod abort;
pub mod config;
pub mod emitter;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod handlers;
pub mod host;
pub mod messenger;
pub mod registry;
pub mod sse;

pub use abort::{AbortController, AbortRegistry, AbortSignal, abort_error_value, default_abort_reason};
pub use config::MessengerConfig;
pub use emitter::{EventEmitter, Listener, ListenerId, Payload};
pub use error::{ConfigError, FetchError, MessengerError, Result};
pub use fetch::{HttpFetch, HttpRequest, HttpResponse, ReqwestFetcher, RequestBody, RequestInit};
pub use frame::{FrameWindow, MessageEvent, TargetResolver, WindowId, fixed_target};
pub use handlers::{CommandHandler, CommandTable};
pub use host::{ChatKitCommand, ChatKitHost, PROFILE_CHANGE_EVENT, PUBLIC_EVENT};
pub use messenger::{Messenger, MessengerBuilder};
pub use registry::{MessageCallback, NonceRegistry, ResponseFuture};
pub use sse::{EVENT_STREAM_CONTENT_TYPE, SseParser, fetch_event_source_with_retry};
