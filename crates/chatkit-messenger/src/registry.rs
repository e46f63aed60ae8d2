//! Pending requests keyed by nonce.
//!
//! Every outbound request registers here before its envelope is posted and is
//! removed exactly once: by its terminal `response`, or by [`NonceRegistry::drain_all`]
//! on teardown. A streaming request additionally carries a message callback that
//! receives each pushed `fetchEventSourceMessage` until the terminal response.

use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chatkit_protocol::{EventSourceMessage, Nonce};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::abort::{AbortController, AbortSignal};
use crate::error::{MessengerError, Result};

/// Callback receiving pushed stream messages.
pub type MessageCallback = Arc<dyn Fn(EventSourceMessage) + Send + Sync>;

type Outcome = Result<Value>;

struct PendingRequest {
    sender: oneshot::Sender<Outcome>,
    origin: &'static Location<'static>,
    on_message: Option<MessageCallback>,
    settled: AbortController,
}

impl PendingRequest {
    fn settle(self, outcome: Outcome) {
        self.settled.abort(None);
        // The caller may have dropped its future; nothing to deliver then.
        let _ = self.sender.send(outcome);
    }
}

/// Table of requests awaiting their terminal response.
#[derive(Default)]
pub struct NonceRegistry {
    pending: Mutex<HashMap<Nonce, PendingRequest>>,
}

impl NonceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request.
    ///
    /// `origin` is the caller's location, used to point rejected errors at the
    /// code that made the call. The returned signal fires once the request is
    /// settled either way.
    pub fn register(
        &self,
        nonce: Nonce,
        origin: &'static Location<'static>,
        on_message: Option<MessageCallback>,
    ) -> (ResponseFuture, AbortSignal) {
        let (sender, receiver) = oneshot::channel();
        let settled = AbortController::new();
        let settled_signal = settled.signal();
        let request = PendingRequest {
            sender,
            origin,
            on_message,
            settled,
        };

        if self.pending.lock().insert(nonce.clone(), request).is_some() {
            error!(%nonce, "Nonce registered twice, replacing pending request");
        }

        (ResponseFuture { nonce, receiver }, settled_signal)
    }

    /// Settle a request successfully.
    ///
    /// Returns `false`, after logging, when no request is pending under `nonce`.
    pub fn resolve(&self, nonce: &Nonce, value: Value) -> bool {
        let Some(request) = self.take(nonce) else {
            return false;
        };
        debug!(%nonce, "Resolving request");
        request.settle(Ok(value));
        true
    }

    /// Settle a request with an error.
    ///
    /// Domain errors get their stack replaced by one pointing at the original
    /// call site; the stack from the other side is kept as the remote stack.
    pub fn reject(&self, nonce: &Nonce, error: MessengerError) -> bool {
        let Some(request) = self.take(nonce) else {
            return false;
        };
        debug!(%nonce, %error, "Rejecting request");
        let error = match error {
            MessengerError::ChatKit(error) => {
                MessengerError::ChatKit(error.with_call_site(request.origin))
            }
            other => other,
        };
        request.settle(Err(error));
        true
    }

    /// Hand a pushed stream message to the request's callback.
    pub fn deliver(&self, nonce: &Nonce, message: EventSourceMessage) -> bool {
        let callback = self
            .pending
            .lock()
            .get(nonce)
            .and_then(|request| request.on_message.clone());

        match callback {
            Some(callback) => {
                callback(message);
                true
            }
            None => {
                error!(%nonce, "No stream handler for fetchEventSourceMessage");
                false
            }
        }
    }

    /// Reject every pending request with [`MessengerError::Closed`].
    pub fn drain_all(&self) -> usize {
        let drained: Vec<(Nonce, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (nonce, request) in drained {
            debug!(%nonce, "Closing pending request");
            request.settle(Err(MessengerError::Closed));
        }
        count
    }

    #[must_use]
    pub fn contains(&self, nonce: &Nonce) -> bool {
        self.pending.lock().contains_key(nonce)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn take(&self, nonce: &Nonce) -> Option<PendingRequest> {
        let request = self.pending.lock().remove(nonce);
        if request.is_none() {
            error!(%nonce, "No pending request for response");
        }
        request
    }
}

impl Drop for NonceRegistry {
    fn drop(&mut self) {
        // Settling fires each request's `settled` signal so abort watchers exit.
        for (nonce, request) in self.pending.get_mut().drain() {
            debug!(%nonce, "Closing pending request on drop");
            request.settle(Err(MessengerError::Closed));
        }
    }
}

/// Future of a request's terminal response.
#[derive(Debug)]
pub struct ResponseFuture {
    nonce: Nonce,
    receiver: oneshot::Receiver<Outcome>,
}

impl ResponseFuture {
    #[must_use]
    pub const fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Await the response and deserialize it.
    ///
    /// # Errors
    /// Returns the request's error, or [`MessengerError::Serialization`] when
    /// the response does not fit `T`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(MessengerError::Closed)))
    }
}
