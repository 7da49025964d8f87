//! CDP Session Multiplexer
//!
//! Many independent debugging sessions over one DevTools connection.
//! Each session sends commands, receives its own events, and ends either
//! because the caller detached it or because its target went away.
//!
//! ```text
//! transport ──► reader ──► response? ──► pending call ──► caller
//!                  │
//!                  └─────► event? ──► session emitter ──► listeners
//! ```

pub mod cdp;
pub mod config;
pub mod events;

pub use cdp::{CDPConnection, CDPError, CDPEvent, CDPSession, CloseReason, Result};
pub use config::ConnectionConfig;
pub use events::{ConnectionEvent, EventBus};
