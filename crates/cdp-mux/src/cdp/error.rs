//! CDP error types
//!
//! Flat error hierarchy. Every failure a caller can see from a command,
//! an attach or a detach lands here.

use thiserror::Error;

use super::protocol::TargetId;
use super::session::CloseReason;

#[derive(Error, Debug)]
pub enum CDPError {
    /// The session was no longer open when the command was issued, or it
    /// closed while the command was in flight.
    #[error("Protocol error ({method}): Session closed. {reason}")]
    SessionClosed { method: String, reason: CloseReason },

    /// The remote side rejected the command.
    #[error("Protocol error ({method}): {message}{}", suffix(.data))]
    Protocol {
        method: String,
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("Failed to attach to target {target}: {source}")]
    AttachFailed {
        target: TargetId,
        #[source]
        source: Box<CDPError>,
    },

    #[error("Protocol error ({method}): Connection closed")]
    ConnectionClosed { method: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CDPError {
    /// True for failures caused by a session that is no longer open.
    pub fn is_session_closed(&self) -> bool {
        match self {
            CDPError::SessionClosed { .. } => true,
            CDPError::AttachFailed { source, .. } => source.is_session_closed(),
            _ => false,
        }
    }

    /// Method name of the command that failed, when there is one.
    pub fn method(&self) -> Option<&str> {
        match self {
            CDPError::SessionClosed { method, .. }
            | CDPError::Protocol { method, .. }
            | CDPError::ConnectionClosed { method }
            | CDPError::InvalidResponse { method, .. } => Some(method),
            CDPError::AttachFailed { source, .. } => source.method(),
            _ => None,
        }
    }
}

fn suffix(data: &Option<String>) -> String {
    data.as_ref().map(|d| format!(" {d}")).unwrap_or_default()
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;
