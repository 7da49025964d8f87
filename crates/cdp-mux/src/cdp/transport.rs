//! Transport seam
//!
//! The connection needs an ordered, reliable carrier of text frames with a
//! write half shared by all senders and a read half owned by one reader.
//! Two carriers ship here: a WebSocket (what Chrome speaks) and an in-memory
//! channel pair for embedding and tests.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::error::{CDPError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a transport
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Read half of a transport
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame, or `None` once the transport is closed.
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

/// WebSocket transport to a DevTools endpoint
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub async fn connect(ws_url: &str) -> Result<(WebSocketSink, WebSocketFrames)> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, stream) = ws_stream.split();
        Ok((
            WebSocketSink {
                sink: Mutex::new(sink),
            },
            WebSocketFrames { stream },
        ))
    }
}

pub struct WebSocketSink {
    sink: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&self, frame: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame))
            .await
            .map_err(|e| CDPError::Transport(format!("WebSocket write failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await?;
        Ok(())
    }
}

pub struct WebSocketFrames {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(CDPError::WebSocket(e))),
            }
        }
    }
}

/// In-memory transport: frames the connection writes show up on
/// `RemoteEnd::outgoing`, frames pushed into `RemoteEnd::incoming` are read
/// by the connection.
pub fn channel() -> (ChannelSink, ChannelFrames, RemoteEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        ChannelSink {
            tx: std::sync::Mutex::new(Some(out_tx)),
        },
        ChannelFrames { rx: in_rx },
        RemoteEnd {
            outgoing: out_rx,
            incoming: in_tx,
        },
    )
}

pub struct ChannelSink {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, frame: String) -> Result<()> {
        let guard = self
            .tx
            .lock()
            .map_err(|_| CDPError::Transport("channel sink poisoned".to_string()))?;
        let tx = guard
            .as_ref()
            .ok_or_else(|| CDPError::Transport("channel closed".to_string()))?;
        tx.send(frame)
            .map_err(|_| CDPError::Transport("remote end dropped".to_string()))
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        Ok(())
    }
}

pub struct ChannelFrames {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for ChannelFrames {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}

/// The remote side of an in-memory transport
pub struct RemoteEnd {
    /// Frames written by the connection
    pub outgoing: mpsc::UnboundedReceiver<String>,
    /// Frames to deliver to the connection; dropping it closes the transport
    pub incoming: mpsc::UnboundedSender<String>,
}
