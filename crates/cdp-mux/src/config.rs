//! Connection configuration

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::cdp::error::{CDPError, Result};

/// Environment variable read by `ConnectionConfig::from_env`
pub const WS_URL_ENV: &str = "CDP_WS_URL";

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Identifies the connection in logs
    pub id: String,
    /// DevTools WebSocket endpoint
    pub ws_url: String,
    /// Buffered lifecycle notifications per subscriber
    pub lifecycle_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            ws_url: "ws://localhost:9222".to_string(),
            lifecycle_capacity: 1024,
        }
    }
}

impl ConnectionConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    /// Defaults, with the endpoint taken from `CDP_WS_URL` when set
    pub fn from_env() -> Self {
        match std::env::var(WS_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.ws_url)
            .map_err(|e| CDPError::InvalidConfig(format!("ws_url {:?}: {}", self.ws_url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(CDPError::InvalidConfig(format!(
                "ws_url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.lifecycle_capacity == 0 {
            return Err(CDPError::InvalidConfig(
                "lifecycle_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
