//! CDP (Chrome DevTools Protocol) session multiplexing
//!
//! Core principle: single transport, many sessions.
//! One reader routes frames; senders never block each other.

pub mod connection;
pub mod emitter;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod session;
pub mod transport;

pub use connection::CDPConnection;
pub use emitter::{EventCallback, EventEmitter, ListenerId};
pub use error::{CDPError, Result};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse};
pub use session::{CDPSession, CloseReason, SessionState};
