//! Pending-call table
//!
//! Every in-flight command owns exactly one entry, keyed by its request id.
//! An entry leaves the table through `take` or one of the drains, and
//! resolving consumes it, so a call cannot be completed twice.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use super::error::Result;
use super::protocol::{RequestId, SessionId, TargetId};

/// Who issued a call, which decides who fails it on teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallScope {
    Connection,
    Session(SessionId),
}

/// What the dispatch path must do besides completing the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Command,
    /// Register a session from the response before the caller resumes.
    /// `None` target means the browser target itself.
    Attach { target: Option<TargetId> },
}

/// One in-flight command
#[derive(Debug)]
pub struct PendingCall {
    pub method: String,
    pub scope: CallScope,
    pub kind: CallKind,
    tx: oneshot::Sender<Result<Value>>,
}

impl PendingCall {
    pub fn new(
        method: impl Into<String>,
        scope: CallScope,
        kind: CallKind,
    ) -> (Self, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            method: method.into(),
            scope,
            kind,
            tx,
        };
        (call, rx)
    }

    /// True once the caller has stopped waiting for the outcome.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Complete the call. The caller may have stopped waiting; that is fine.
    pub fn resolve(self, outcome: Result<Value>) {
        let _ = self.tx.send(outcome);
    }
}

/// Table of in-flight commands for one connection
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: DashMap<RequestId, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: RequestId, call: PendingCall) {
        let previous = self.calls.insert(id, call);
        debug_assert!(previous.is_none(), "request id {} reused", id);
    }

    /// Remove the call matching a response, if it is still outstanding.
    pub fn take(&self, id: RequestId) -> Option<PendingCall> {
        self.calls.remove(&id).map(|(_, call)| call)
    }

    /// Remove every call issued by one session.
    pub fn drain_session(&self, session_id: &str) -> Vec<PendingCall> {
        self.drain_where(|scope| matches!(scope, CallScope::Session(s) if s == session_id))
    }

    /// Remove everything still outstanding.
    pub fn drain_all(&self) -> Vec<PendingCall> {
        self.drain_where(|_| true)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn drain_where(&self, matches: impl Fn(&CallScope) -> bool) -> Vec<PendingCall> {
        let ids: Vec<RequestId> = self
            .calls
            .iter()
            .filter(|entry| matches(&entry.value().scope))
            .map(|entry| *entry.key())
            .collect();

        let mut drained: Vec<(RequestId, PendingCall)> = ids
            .into_iter()
            .filter_map(|id| self.calls.remove(&id))
            .collect();
        drained.sort_by_key(|(id, _)| *id);
        drained.into_iter().map(|(_, call)| call).collect()
    }
}
