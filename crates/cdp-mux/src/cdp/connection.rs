//! CDP Connection - The Core Communication Layer
//!
//! Design decisions:
//! 1. Single transport per browser connection, sessions multiplexed on it
//! 2. One reader task decodes frames; any number of tasks may send
//! 3. Request/response matching via ID, events routed by session id
//! 4. Fail fast - no retries, no queuing. Let the caller decide.
//!
//! Locking: a session's state lock gates registering calls for that session
//! and closing it; the connection's `closed` lock gates connection-level
//! calls and session registration. Lock order is session state, then
//! `closed`. Neither is held across an await.

use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::Instrument;

use super::emitter::{EventCallback, EventEmitter, ListenerId};
use super::error::{CDPError, Result};
use super::pending::{CallKind, CallScope, PendingCall, PendingCalls};
use super::protocol::*;
use super::session::{CDPSession, CloseReason, SessionCore, SessionState};
use super::transport::{FrameSink, FrameStream, WebSocketTransport};
use crate::config::ConnectionConfig;
use crate::events::{ConnectionEvent, EventBus};

/// Wrap an attach failure, except when the connection itself is gone.
fn attach_error(target: &str, source: CDPError) -> CDPError {
    match source {
        closed @ CDPError::ConnectionClosed { .. } => closed,
        other => CDPError::AttachFailed {
            target: target.to_string(),
            source: Box::new(other),
        },
    }
}

/// CDP Connection - owns the transport and every session attached over it
pub struct CDPConnection {
    config: ConnectionConfig,

    /// Monotonic request ID counter, shared by all sessions
    next_id: AtomicU64,

    /// Commands waiting for responses
    pending: PendingCalls,

    /// Live sessions by session id
    sessions: DashMap<SessionId, Arc<SessionCore>>,

    /// Listeners for events without a session id
    emitter: EventEmitter,

    event_bus: EventBus,

    sink: Box<dyn FrameSink>,

    closed: Mutex<bool>,

    shutdown: Notify,
}

impl CDPConnection {
    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        Self::connect_with(ConnectionConfig::new(ws_url)).await
    }

    pub async fn connect_with(config: ConnectionConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let (sink, stream) = WebSocketTransport::connect(&config.ws_url).await?;
        tracing::info!(connection_id = %config.id, url = %config.ws_url, "Connected");
        Ok(Self::new(sink, stream, config))
    }

    /// Build a connection over any transport and start its reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        sink: impl FrameSink + 'static,
        stream: impl FrameStream + 'static,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            event_bus: EventBus::with_capacity(config.lifecycle_capacity),
            config,
            next_id: AtomicU64::new(1),
            pending: PendingCalls::new(),
            sessions: DashMap::new(),
            emitter: EventEmitter::new(),
            sink: Box::new(sink),
            closed: Mutex::new(false),
            shutdown: Notify::new(),
        });
        connection.spawn_reader(stream);
        connection
    }

    fn spawn_reader(self: &Arc<Self>, mut stream: impl FrameStream + 'static) {
        let connection = self.clone();
        let span = tracing::info_span!("cdp_reader", connection_id = %self.config.id);

        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        frame = stream.next_frame() => {
                            match frame {
                                Some(Ok(text)) => {
                                    if let Err(e) = connection.dispatch_incoming(&text) {
                                        tracing::error!("Failed to handle message: {}", e);
                                    }
                                }
                                Some(Err(e)) => {
                                    tracing::error!("Transport error: {}", e);
                                    break;
                                }
                                None => {
                                    tracing::info!("Transport closed");
                                    break;
                                }
                            }
                        }
                        _ = connection.shutdown.notified() => {
                            tracing::info!("Shutdown signal received");
                            break;
                        }
                    }
                }

                connection.teardown();
            }
            .instrument(span),
        );
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        *self.lock_closed()
    }

    /// Number of commands still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Ids of the live sessions
    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Handle for a live session
    pub fn session(self: &Arc<Self>, session_id: &str) -> Option<CDPSession> {
        let core = self.sessions.get(session_id).map(|e| e.value().clone())?;
        Some(CDPSession::new(self.clone(), core))
    }

    /// Attach to a target and create a session for it
    pub async fn create_session(self: &Arc<Self>, target_id: impl Into<TargetId>) -> Result<CDPSession> {
        let target_id = target_id.into();
        let attach_failed = |source| attach_error(&target_id, source);

        let result = self
            .call(
                methods::ATTACH_TO_TARGET.to_string(),
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                CallKind::Attach {
                    target: Some(target_id.clone()),
                },
            )
            .await
            .map_err(attach_failed)?;

        self.adopt(methods::ATTACH_TO_TARGET, result)
            .map_err(attach_failed)
    }

    /// Attach to the browser target itself
    pub async fn create_browser_session(self: &Arc<Self>) -> Result<CDPSession> {
        let attach_failed = |source| attach_error("browser", source);

        let result = self
            .call(
                methods::ATTACH_TO_BROWSER_TARGET.to_string(),
                None,
                CallKind::Attach { target: None },
            )
            .await
            .map_err(attach_failed)?;

        self.adopt(methods::ATTACH_TO_BROWSER_TARGET, result)
            .map_err(attach_failed)
    }

    /// Turn an attach result into a handle for the session the reader
    /// registered when the response arrived.
    fn adopt(self: &Arc<Self>, method: &str, result: Value) -> Result<CDPSession> {
        let attach: AttachToTargetResult =
            serde_json::from_value(result).map_err(|e| CDPError::InvalidResponse {
                method: method.to_string(),
                reason: e.to_string(),
            })?;

        match self.session(&attach.session_id) {
            Some(session) => Ok(session),
            None if self.is_closed() => Err(CDPError::ConnectionClosed {
                method: method.to_string(),
            }),
            None => Err(CDPError::SessionClosed {
                method: method.to_string(),
                reason: CloseReason::TargetGone,
            }),
        }
    }

    /// Send a command not bound to any session
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.call(method.into(), params, CallKind::Command).await
    }

    /// Send CDP request and wait for response
    ///
    /// With a session id, fails with `SessionClosed` without touching the
    /// transport when that session is not live.
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        let method = method.into();
        match session_id {
            None => self.call(method, params, CallKind::Command).await,
            Some(session_id) => {
                let core = self.sessions.get(&session_id).map(|e| e.value().clone());
                match core {
                    Some(core) => self.send_in_session(&core, method, params).await,
                    None => Err(CDPError::SessionClosed {
                        method,
                        reason: CloseReason::NotAttached,
                    }),
                }
            }
        }
    }

    async fn call(&self, method: String, params: Option<Value>, kind: CallKind) -> Result<Value> {
        let (id, rx) = {
            let closed = self.lock_closed();
            if *closed {
                return Err(CDPError::ConnectionClosed { method });
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let (call, rx) = PendingCall::new(method.clone(), CallScope::Connection, kind);
            self.pending.insert(id, call);
            (id, rx)
        };

        self.transmit(id, method, params, None, rx).await
    }

    pub(crate) async fn send_in_session(
        &self,
        core: &SessionCore,
        method: String,
        params: Option<Value>,
    ) -> Result<Value> {
        let (id, rx) = {
            let state = core.lock_state();
            if let SessionState::Closed(reason) = *state {
                return Err(CDPError::SessionClosed { method, reason });
            }
            if self.is_closed() {
                return Err(CDPError::ConnectionClosed { method });
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let (call, rx) = PendingCall::new(
                method.clone(),
                CallScope::Session(core.id.clone()),
                CallKind::Command,
            );
            self.pending.insert(id, call);
            (id, rx)
        };

        self.transmit(id, method, params, Some(core.id.clone()), rx)
            .await
    }

    async fn transmit(
        &self,
        id: RequestId,
        method: String,
        params: Option<Value>,
        session_id: Option<SessionId>,
        rx: oneshot::Receiver<Result<Value>>,
    ) -> Result<Value> {
        let request = CDPRequest {
            id,
            method,
            params,
            session_id,
        };

        let written = match encode_request(&request) {
            Ok(frame) => self.sink.send(frame).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            // Still pending means nobody else resolved it; otherwise the
            // resolution already waiting in `rx` wins.
            if self.pending.take(id).is_some() {
                return Err(e);
            }
        }

        rx.await.map_err(|_| CDPError::ConnectionClosed {
            method: request.method,
        })?
    }

    /// Handle one incoming frame: complete a call or route an event
    pub fn dispatch_incoming(self: &Arc<Self>, text: &str) -> Result<()> {
        match decode_message(text)? {
            CDPMessage::Response(response) => self.handle_response(response),
            CDPMessage::Event(event) => self.handle_event(event),
        }
        Ok(())
    }

    fn handle_response(self: &Arc<Self>, response: CDPResponse) {
        let Some(call) = self.pending.take(response.id) else {
            tracing::warn!("Received response for unknown request: {}", response.id);
            return;
        };

        match (&call.scope, response.session_id.as_deref()) {
            (CallScope::Session(expected), Some(got)) if expected != got => {
                tracing::warn!(
                    request_id = response.id,
                    expected = %expected,
                    got,
                    "Response sessionId does not match the calling session"
                );
            }
            (CallScope::Connection, Some(got)) => {
                tracing::warn!(
                    request_id = response.id,
                    got,
                    "Response to a connection-level call carries a sessionId"
                );
            }
            _ => {}
        }

        let outcome = match response.error {
            Some(error) => Err(error.into_error(&call.method)),
            None => {
                let result = response.result.unwrap_or(Value::Null);
                if let CallKind::Attach { target } = &call.kind {
                    if call.is_abandoned() {
                        self.detach_abandoned(&result);
                    } else {
                        self.register_attached(&result, target.clone());
                    }
                }
                Ok(result)
            }
        };
        call.resolve(outcome);
    }

    /// Nobody is waiting for this attach any more: release the remote
    /// session instead of registering it.
    fn detach_abandoned(self: &Arc<Self>, result: &Value) {
        let Some(session_id) = result.get("sessionId").and_then(Value::as_str) else {
            return;
        };
        let session_id = session_id.to_string();
        tracing::debug!(session_id = %session_id, "Attach abandoned by caller, detaching");

        let connection = self.clone();
        tokio::spawn(async move {
            if let Err(e) = connection
                .send(
                    methods::DETACH_FROM_TARGET,
                    Some(json!({ "sessionId": session_id })),
                )
                .await
            {
                tracing::warn!(session_id = %session_id, "Failed to detach abandoned session: {}", e);
            }
        });
    }

    fn register_attached(&self, result: &Value, target_id: Option<TargetId>) {
        let Some(session_id) = result.get("sessionId").and_then(Value::as_str) else {
            tracing::warn!("Attach response without sessionId: {}", result);
            return;
        };

        {
            let closed = self.lock_closed();
            if *closed {
                return;
            }
            let core = Arc::new(SessionCore::new(session_id.to_string(), target_id.clone()));
            self.sessions.insert(session_id.to_string(), core);
        }

        tracing::debug!(session_id, target_id = ?target_id, "Session attached");
        self.event_bus.publish(ConnectionEvent::SessionAttached {
            session_id: session_id.to_string(),
            target_id,
        });
    }

    fn handle_event(&self, event: CDPEvent) {
        self.apply_target_lifecycle(&event);

        match &event.session_id {
            Some(session_id) => {
                let core = self.sessions.get(session_id).map(|e| e.value().clone());
                match core {
                    Some(core) => {
                        core.emitter.emit(&event);
                    }
                    None => {
                        tracing::debug!(
                            session_id = %session_id,
                            "Dropping {} for unknown session",
                            event.method
                        );
                    }
                }
            }
            None => {
                self.emitter.emit(&event);
            }
        }
    }

    /// Close sessions whose target the browser reports as gone.
    fn apply_target_lifecycle(&self, event: &CDPEvent) {
        match event.method.as_str() {
            methods::DETACHED_FROM_TARGET => {
                if let Some(session_id) = event.param_str("sessionId") {
                    self.close_session(session_id, CloseReason::TargetGone);
                }
            }
            methods::TARGET_DESTROYED | methods::TARGET_CRASHED => {
                if let Some(target_id) = event.param_str("targetId") {
                    self.on_target_gone(target_id);
                }
            }
            _ => {}
        }
    }

    /// Close a live session. Returns false if no such session was live.
    pub fn close_session(&self, session_id: &str, reason: CloseReason) -> bool {
        let core = self.sessions.get(session_id).map(|e| e.value().clone());
        match core {
            Some(core) => self.close_core(&core, reason).is_ok(),
            None => false,
        }
    }

    /// Close every session bound to a target. Returns how many closed.
    pub fn on_target_gone(&self, target_id: &str) -> usize {
        let affected: Vec<Arc<SessionCore>> = self
            .sessions
            .iter()
            .filter(|e| e.value().target_id.as_deref() == Some(target_id))
            .map(|e| e.value().clone())
            .collect();

        affected
            .iter()
            .filter(|core| self.close_core(core, CloseReason::TargetGone).is_ok())
            .count()
    }

    /// Move a session to `Closed` and fail its outstanding calls.
    ///
    /// Errors with the earlier reason when it was already closed.
    fn close_core(&self, core: &SessionCore, reason: CloseReason) -> std::result::Result<(), CloseReason> {
        let drained = {
            let mut state = core.lock_state();
            if let SessionState::Closed(previous) = *state {
                return Err(previous);
            }
            *state = SessionState::Closed(reason);
            self.sessions.remove(&core.id);
            self.pending.drain_session(&core.id)
        };

        core.emitter.clear();
        for call in drained {
            let method = call.method.clone();
            call.resolve(Err(CDPError::SessionClosed { method, reason }));
        }

        tracing::debug!(session_id = %core.id, ?reason, "Session closed");
        self.event_bus.publish(ConnectionEvent::SessionClosed {
            session_id: core.id.clone(),
            reason,
        });
        Ok(())
    }

    pub(crate) async fn detach_session(&self, core: &SessionCore) -> Result<()> {
        if let Err(reason) = self.close_core(core, CloseReason::Detached) {
            return Err(CDPError::SessionClosed {
                method: methods::DETACH_FROM_TARGET.to_string(),
                reason,
            });
        }

        self.send(
            methods::DETACH_FROM_TARGET,
            Some(json!({ "sessionId": core.id })),
        )
        .await?;
        Ok(())
    }

    /// Subscribe to events that carry no session id
    pub fn on(&self, method: impl Into<String>, callback: EventCallback) -> ListenerId {
        self.emitter.on(method, callback)
    }

    pub fn off(&self, method: &str, id: ListenerId) -> bool {
        self.emitter.off(method, id)
    }

    /// Wait for the next connection-level event named `method`
    pub async fn once(&self, method: impl Into<String>) -> Result<CDPEvent> {
        let method = method.into();
        let rx = self.emitter.once(method.clone());
        if self.is_closed() {
            return Err(CDPError::ConnectionClosed { method });
        }
        rx.await.map_err(|_| CDPError::ConnectionClosed { method })
    }

    /// Subscribe to session attach/close and disconnect notifications
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_bus.subscribe()
    }

    /// Close every session and fail everything still in flight.
    fn teardown(&self) {
        {
            let mut closed = self.lock_closed();
            if *closed {
                return;
            }
            *closed = true;
        }

        let live: Vec<Arc<SessionCore>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        for core in &live {
            let _ = self.close_core(core, CloseReason::ConnectionClosed);
        }

        for call in self.pending.drain_all() {
            let method = call.method.clone();
            call.resolve(Err(CDPError::ConnectionClosed { method }));
        }

        self.emitter.clear();
        tracing::info!(connection_id = %self.config.id, sessions = live.len(), "Connection torn down");
        self.event_bus.publish(ConnectionEvent::Disconnected);
    }

    /// Close connection gracefully
    pub async fn close(&self) -> Result<()> {
        let result = self.sink.close().await;
        self.teardown();
        self.shutdown.notify_one();
        result
    }

    fn lock_closed(&self) -> MutexGuard<'_, bool> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
