//! Event subscriptions for inbound `event` messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

/// Data carried by an event or command, plus any transferred buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub data: Value,
    pub transfer: Vec<Bytes>,
}

impl Payload {
    #[must_use]
    pub const fn new(data: Value) -> Self {
        Self {
            data,
            transfer: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_transfer(data: Value, transfer: Vec<Bytes>) -> Self {
        Self { data, transfer }
    }
}

/// Event listener callback.
pub type Listener = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Handle returned by [`EventEmitter::on`], used to remove that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listeners keyed by event name.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for `event`.
    pub fn on(&self, event: impl Into<String>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(event.into())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove one listener, or every listener for `event` when `id` is `None`.
    ///
    /// Returns how many listeners were removed.
    pub fn off(&self, event: &str, id: Option<ListenerId>) -> usize {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(event) else {
            return 0;
        };
        let before = entries.len();
        match id {
            Some(id) => entries.retain(|(existing, _)| *existing != id),
            None => entries.clear(),
        }
        let removed = before.saturating_sub(entries.len());
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Call every listener for `event`. Returns how many were called.
    ///
    /// Listeners are called outside the lock, so they may subscribe or
    /// unsubscribe while handling an event.
    pub fn emit(&self, event: &str, payload: &Payload) -> usize {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .get(event)
            .map(|entries| entries.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default();

        trace!(event, listeners = snapshot.len(), "Emitting event");
        for listener in &snapshot {
            listener(payload);
        }
        snapshot.len()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }
}
