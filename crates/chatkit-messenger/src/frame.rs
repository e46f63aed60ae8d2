//! In-process model of a browser window's `postMessage` channel.
//!
//! A [`FrameWindow`] has an identity and an origin. Posting to it with a
//! target origin that is neither `"*"` nor the window's own origin is dropped
//! without error, the same way a browser drops it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chatkit_protocol::WILDCARD_ORIGIN;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a window, compared to filter messages by source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

impl WindowId {
    fn next() -> Self {
        Self(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// A delivered message, as seen by a `message` listener.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Structured-clone payload.
    pub data: Value,
    /// Origin of the sending window.
    pub origin: String,
    /// Sending window, `None` when posted from outside any window.
    pub source: Option<WindowId>,
    /// Buffers whose ownership moved with the message.
    pub transfer: Vec<Bytes>,
}

struct WindowInner {
    id: WindowId,
    origin: String,
    listeners: Mutex<Vec<mpsc::UnboundedSender<MessageEvent>>>,
}

/// Cloneable handle to a window.
#[derive(Clone)]
pub struct FrameWindow {
    inner: Arc<WindowInner>,
}

impl FrameWindow {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                id: WindowId::next(),
                origin: origin.into(),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> WindowId {
        self.inner.id
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    /// Subscribe to messages posted to this window.
    ///
    /// Dropping the receiver unsubscribes.
    #[must_use]
    pub fn listen(&self) -> mpsc::UnboundedReceiver<MessageEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.listeners.lock().push(sender);
        receiver
    }

    /// Post `data` to this window as if sent by `source`.
    ///
    /// Returns `false` when the target origin does not match and the message
    /// was dropped.
    pub fn post_message(
        &self,
        data: Value,
        target_origin: &str,
        source: &Self,
        transfer: Vec<Bytes>,
    ) -> bool {
        if target_origin != WILDCARD_ORIGIN && target_origin != self.origin() {
            trace!(
                window = %self.id(),
                target_origin,
                origin = self.origin(),
                "Dropping message for mismatched origin"
            );
            return false;
        }

        let event = MessageEvent {
            data,
            origin: source.origin().to_string(),
            source: Some(source.id()),
            transfer,
        };
        let mut listeners = self.inner.listeners.lock();
        listeners.retain(|listener| listener.send(event.clone()).is_ok());
        true
    }

    /// Deliver a raw event, bypassing origin checks. Used to inject traffic
    /// from windows that are not modelled, such as browser extensions.
    pub fn dispatch(&self, event: MessageEvent) {
        let mut listeners = self.inner.listeners.lock();
        listeners.retain(|listener| listener.send(event.clone()).is_ok());
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.inner.listeners.lock();
        listeners.retain(|listener| !listener.is_closed());
        listeners.len()
    }
}

impl fmt::Debug for FrameWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameWindow")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .finish_non_exhaustive()
    }
}

/// Resolves the window messages are sent to. Called on every send, since an
/// iframe's content window can change across reloads.
pub type TargetResolver = Arc<dyn Fn() -> Option<FrameWindow> + Send + Sync>;

/// Resolver that always yields `window`.
#[must_use]
pub fn fixed_target(window: FrameWindow) -> TargetResolver {
    Arc::new(move || Some(window.clone()))
}
