//! Abort controllers and the per-nonce registry of running operations.
//!
//! A controller can be aborted at most once; later calls keep the first reason.

use std::collections::HashMap;
use std::future;
use std::sync::Arc;

use chatkit_protocol::Nonce;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;

const ABORT_MESSAGE: &str = "This operation was aborted";

/// Reason recorded when `abort` is called without one.
#[must_use]
pub fn default_abort_reason() -> Value {
    json!({ "name": "AbortError", "message": ABORT_MESSAGE })
}

/// Error value answered for an aborted operation.
///
/// A reason that already is an `AbortError` object is used as-is; anything
/// else is carried under `reason`.
#[must_use]
pub fn abort_error_value(reason: Option<Value>) -> Value {
    match reason {
        Some(reason) if is_abort_error(&reason) => reason,
        Some(reason) => json!({ "name": "AbortError", "message": ABORT_MESSAGE, "reason": reason }),
        None => default_abort_reason(),
    }
}

fn is_abort_error(value: &Value) -> bool {
    value.get("name").and_then(Value::as_str) == Some("AbortError")
}

/// Owner side of a cancellation.
#[derive(Debug, Clone)]
pub struct AbortController {
    sender: Arc<watch::Sender<Option<Value>>>,
}

impl AbortController {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signal observing this controller.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Abort with `reason`, or the default `AbortError` when `None`.
    ///
    /// Returns `false` if the controller was already aborted.
    pub fn abort(&self, reason: Option<Value>) -> bool {
        let reason = reason.unwrap_or_else(default_abort_reason);
        self.sender.send_if_modified(|state| {
            if state.is_some() {
                false
            } else {
                *state = Some(reason);
                true
            }
        })
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.sender.borrow().is_some()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    receiver: watch::Receiver<Option<Value>>,
}

impl AbortSignal {
    /// Signal that never aborts.
    #[must_use]
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(None);
        Self { receiver }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Abort reason, once aborted.
    #[must_use]
    pub fn reason(&self) -> Option<Value> {
        self.receiver.borrow().clone()
    }

    /// Resolve with the reason once aborted. Pends forever if the controller
    /// is dropped without aborting.
    pub async fn aborted(&self) -> Value {
        let mut receiver = self.receiver.clone();
        let reason = match receiver.wait_for(Option::is_some).await {
            Ok(state) => state.clone(),
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            None => future::pending().await,
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Controllers for operations this side is running on behalf of the other.
#[derive(Debug, Default)]
pub struct AbortRegistry {
    controllers: Mutex<HashMap<Nonce, AbortController>>,
}

impl AbortRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh controller under `nonce` and return its signal.
    pub fn insert(&self, nonce: Nonce) -> AbortSignal {
        let controller = AbortController::new();
        let signal = controller.signal();
        self.controllers.lock().insert(nonce, controller);
        signal
    }

    /// Abort and forget the operation under `nonce`.
    ///
    /// Returns `false` if nothing is registered, e.g. it already finished.
    pub fn abort(&self, nonce: &Nonce, reason: Option<Value>) -> bool {
        let controller = self.controllers.lock().remove(nonce);
        controller.is_some_and(|controller| {
            controller.abort(reason);
            true
        })
    }

    /// Forget a finished operation.
    pub fn complete(&self, nonce: &Nonce) -> bool {
        self.controllers.lock().remove(nonce).is_some()
    }

    /// Abort everything still running. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let controllers: Vec<AbortController> = self
            .controllers
            .lock()
            .drain()
            .map(|(_, controller)| controller)
            .collect();
        for controller in &controllers {
            controller.abort(None);
        }
        controllers.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.controllers.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controllers.lock().is_empty()
    }
}
