//! Event Bus - connection lifecycle notifications
//!
//! Design: type-safe events over a tokio broadcast channel.
//! Protocol events go through the per-session emitters instead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::cdp::protocol::{SessionId, TargetId};
use crate::cdp::session::CloseReason;

/// Lifecycle events published by a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    SessionAttached {
        session_id: SessionId,
        target_id: Option<TargetId>,
    },
    SessionClosed {
        session_id: SessionId,
        reason: CloseReason,
    },
    Disconnected,
}

/// Simple event bus using tokio broadcast channel
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: ConnectionEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
