//! CDP Protocol Types
//!
//! The generic envelope only: outgoing commands, incoming responses and
//! incoming events. Domain-specific payloads stay as `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{CDPError, Result};

/// Request ID - monotonically increasing, never reused on one connection
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// Methods and events the connection itself understands.
pub mod methods {
    pub const ATTACH_TO_TARGET: &str = "Target.attachToTarget";
    pub const ATTACH_TO_BROWSER_TARGET: &str = "Target.attachToBrowserTarget";
    pub const DETACH_FROM_TARGET: &str = "Target.detachFromTarget";
    pub const DETACHED_FROM_TARGET: &str = "Target.detachedFromTarget";
    pub const TARGET_DESTROYED: &str = "Target.targetDestroyed";
    pub const TARGET_CRASHED: &str = "Target.targetCrashed";
    pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
}

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

/// Error object reported by the remote side
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RemoteError {
    /// Convert into a caller-facing error tagged with the failing method.
    pub fn into_error(self, method: &str) -> CDPError {
        let data = self.data.map(|d| match d {
            Value::String(s) => s,
            other => other.to_string(),
        });
        CDPError::Protocol {
            method: method.to_string(),
            code: self.code,
            message: self.message,
            data,
        }
    }
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,
}

impl CDPEvent {
    /// Borrow a string field out of the event params.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }
}

/// Unified incoming CDP message (response or event)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Response(CDPResponse),
    Event(CDPEvent),
}

/// Serialize a command envelope into a text frame.
pub fn encode_request(request: &CDPRequest) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Decode one incoming text frame.
pub fn decode_message(text: &str) -> Result<CDPMessage> {
    Ok(serde_json::from_str(text)?)
}

/// Result of Target.attachToTarget / Target.attachToBrowserTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}
