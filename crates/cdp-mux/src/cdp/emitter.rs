//! Event Emitter - per-scope fan-out of decoded events
//!
//! Listeners are keyed by event name and fire in registration order.
//! Callbacks run outside the map lock, so a listener may register or
//! remove listeners (itself included) while it runs.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::protocol::CDPEvent;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(CDPEvent) + Send + Sync>;

/// Handle returned by `on`, used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    callback: EventCallback,
}

#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,

    /// Key: method name (e.g., "Network.requestWillBeSent"), Value: callbacks
    listeners: DashMap<String, Vec<Listener>>,

    /// One-shot waiters, consumed by the first matching event
    waiters: DashMap<String, Vec<oneshot::Sender<CDPEvent>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for every event named `method`.
    pub fn on(&self, method: impl Into<String>, callback: EventCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(method.into())
            .or_default()
            .push(Listener { id, callback });
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, method: &str, id: ListenerId) -> bool {
        let Some(mut entry) = self.listeners.get_mut(method) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| l.id != id);
        let removed = entry.len() != before;
        let empty = entry.is_empty();
        drop(entry);

        if empty {
            self.listeners.remove_if(method, |_, v| v.is_empty());
        }
        removed
    }

    /// Receive the next event named `method`.
    ///
    /// The receiver errors if the emitter is cleared first.
    pub fn once(&self, method: impl Into<String>) -> oneshot::Receiver<CDPEvent> {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(method.into()).or_default().push(tx);
        rx
    }

    /// Deliver an event to everything registered for its name.
    ///
    /// Returns how many listeners and waiters received it.
    pub fn emit(&self, event: &CDPEvent) -> usize {
        let callbacks: Vec<EventCallback> = self
            .listeners
            .get(&event.method)
            .map(|entry| entry.iter().map(|l| l.callback.clone()).collect())
            .unwrap_or_default();

        for callback in &callbacks {
            callback(event.clone());
        }

        let waiters = self
            .waiters
            .remove(&event.method)
            .map(|(_, w)| w)
            .unwrap_or_default();
        let mut delivered = callbacks.len();
        for tx in waiters {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn listener_count(&self, method: &str) -> usize {
        self.listeners.get(method).map(|e| e.len()).unwrap_or(0)
    }

    /// Drop every listener and waiter.
    pub fn clear(&self) {
        self.listeners.clear();
        self.waiters.clear();
    }
}
