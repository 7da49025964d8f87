//! CDP Session - a handle bound to one attached target
//!
//! Design: lightweight wrapper around the shared connection. All sessions
//! share the same transport; the session only gates on its own state and
//! owns its event listeners.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::connection::CDPConnection;
use super::emitter::{EventCallback, EventEmitter, ListenerId};
use super::error::{CDPError, Result};
use super::protocol::{methods, CDPEvent, SessionId, TargetId};

/// Why a session stopped being usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The caller detached it.
    Detached,
    /// The target went away (page closed, crashed, or detached remotely).
    TargetGone,
    /// The shared transport closed.
    ConnectionClosed,
    /// No session with that id is attached on this connection.
    NotAttached,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Detached => write!(f, "Session was detached."),
            CloseReason::TargetGone => write!(f, "Most likely the page has been closed."),
            CloseReason::ConnectionClosed => write!(f, "Most likely the browser has been closed."),
            CloseReason::NotAttached => write!(f, "No session with given id."),
        }
    }
}

/// Lifecycle state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed(CloseReason),
}

/// State shared between the connection's registry and every handle.
pub(crate) struct SessionCore {
    pub(crate) id: SessionId,
    pub(crate) target_id: Option<TargetId>,
    state: Mutex<SessionState>,
    pub(crate) emitter: EventEmitter,
}

impl SessionCore {
    pub(crate) fn new(id: SessionId, target_id: Option<TargetId>) -> Self {
        Self {
            id,
            target_id,
            state: Mutex::new(SessionState::Open),
            emitter: EventEmitter::new(),
        }
    }

    /// The state lock is the gate for registering calls and for closing.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    /// Shared CDP connection
    connection: Arc<CDPConnection>,
    core: Arc<SessionCore>,
}

impl CDPSession {
    pub(crate) fn new(connection: Arc<CDPConnection>, core: Arc<SessionCore>) -> Self {
        Self { connection, core }
    }

    /// Session ID assigned by Chrome
    pub fn id(&self) -> &SessionId {
        &self.core.id
    }

    /// Target this session is attached to; `None` for the browser session
    pub fn target_id(&self) -> Option<&TargetId> {
        self.core.target_id.as_ref()
    }

    pub fn state(&self) -> SessionState {
        *self.core.lock_state()
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.state() {
            SessionState::Open => None,
            SessionState::Closed(reason) => Some(reason),
        }
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.connection
            .send_in_session(&self.core, method.into(), params)
            .await
    }

    /// Evaluate JavaScript, returning the value by value
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<Value> {
        self.send(
            methods::RUNTIME_EVALUATE,
            Some(json!({
                "expression": expression.into(),
                "returnByValue": true,
            })),
        )
        .await
    }

    /// Enable several domains at once.
    ///
    /// All `<Domain>.enable` commands are in flight together; the first
    /// failure is returned after every command has completed.
    pub async fn enable_domains(&self, domains: &[&str]) -> Result<()> {
        let enable_futures: Vec<_> = domains
            .iter()
            .map(|domain| self.send(format!("{}.enable", domain), None))
            .collect();

        let results = futures_util::future::join_all(enable_futures).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!(
                session_id = %self.core.id,
                "Some domain enables failed: {}/{}",
                failures,
                results.len()
            );
        }
        match results.into_iter().find(|r| r.is_err()) {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Subscribe to events of this session
    pub fn on(&self, method: impl Into<String>, callback: EventCallback) -> ListenerId {
        self.core.emitter.on(method, callback)
    }

    pub fn off(&self, method: &str, id: ListenerId) -> bool {
        self.core.emitter.off(method, id)
    }

    /// Wait for the next event named `method`.
    pub async fn once(&self, method: impl Into<String>) -> Result<CDPEvent> {
        let method = method.into();
        // Register before checking state: closing clears the emitter after
        // flipping the state, so a waiter is either dropped or refused.
        let rx = self.core.emitter.once(method.clone());
        if let Some(reason) = self.close_reason() {
            return Err(CDPError::SessionClosed { method, reason });
        }
        rx.await.map_err(|_| CDPError::SessionClosed {
            method,
            reason: self.close_reason().unwrap_or(CloseReason::NotAttached),
        })
    }

    /// Detach from the target.
    ///
    /// Fails with `SessionClosed` when the session was already closed,
    /// including when the target disappeared before this call.
    pub async fn detach(&self) -> Result<()> {
        self.connection.detach_session(&self.core).await
    }
}

impl fmt::Debug for CDPSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CDPSession")
            .field("session_id", &self.core.id)
            .field("target_id", &self.core.target_id)
            .field("state", &self.state())
            .finish()
    }
}
