// ============================================
// File: crates/fleetlink-transport/src/ws.rs
// ============================================
//! # WebSocket Socket
//!
//! ## Creation Reason
//! Devices keep one WebSocket open to the server. This adapts a
//! `tokio-tungstenite` stream to the `WireSocket` trait.
//!
//! ## Main Functionality
//! - `WsSocket`: Split stream, one lock per direction
//! - Text frames pass through; binary frames are accepted if valid UTF-8
//! - Ping/pong is answered by tungstenite itself
//!
//! ## ⚠️ Important Note for Next Developer
//! - The reader and writer halves are locked independently, so a slow
//!   `send` never blocks `recv`
//! - `close` gives up after `CLOSE_TIMEOUT`; devices on bad links often
//!   never answer the close frame
//!
//! ## Last Modified
//! v0.1.0 - Initial WebSocket socket

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::error::{ConnectionError, Result};
use crate::traits::WireSocket;

/// Maximum time to wait for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket implementation of [`WireSocket`].
pub struct WsSocket<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    remote: Option<SocketAddr>,
    open: AtomicBool,
}

impl<S> WsSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an accepted WebSocket stream.
    #[must_use]
    pub fn new(ws: WebSocketStream<S>, remote: Option<SocketAddr>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            remote,
            open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl<S> WireSocket for WsSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&self) -> Result<Option<String>> {
        let mut stream = self.stream.lock().await;
        loop {
            let Some(item) = stream.next().await else {
                self.open.store(false, Ordering::Release);
                return Ok(None);
            };

            match item {
                Ok(WsMessage::Text(text)) => return Ok(Some(text.to_string())),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        warn!(remote = ?self.remote, len = bytes.len(), "Dropping non-UTF-8 binary frame");
                    }
                },
                Ok(WsMessage::Close(frame)) => {
                    debug!(remote = ?self.remote, ?frame, "Peer sent close frame");
                    self.open.store(false, Ordering::Release);
                    return Ok(None);
                }
                Ok(_) => trace!(remote = ?self.remote, "Control frame"),
                Err(e) => {
                    self.open.store(false, Ordering::Release);
                    return Err(ConnectionError::socket(e.to_string()));
                }
            }
        }
    }

    async fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(ConnectionError::socket("websocket closed"));
        }
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| ConnectionError::socket(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(result) => result.map_err(|e| ConnectionError::socket(e.to_string())),
            Err(_) => {
                debug!(remote = ?self.remote, "Close handshake timed out");
                Ok(())
            }
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl<S> std::fmt::Debug for WsSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSocket")
            .field("remote", &self.remote)
            .field("open", &self.open.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (WsSocket<tokio::io::DuplexStream>, WebSocketStream<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (WsSocket::new(server, None), client)
    }

    #[tokio::test]
    async fn test_ws_text_roundtrip() {
        let (socket, mut client) = pair().await;

        client.send(WsMessage::Text("hello".into())).await.unwrap();
        assert_eq!(socket.recv().await.unwrap().as_deref(), Some("hello"));

        socket.send("world".into()).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, WsMessage::Text("world".into()));
    }

    #[tokio::test]
    async fn test_ws_binary_utf8_accepted() {
        let (socket, mut client) = pair().await;

        client.send(WsMessage::Binary(vec![0xff, 0xfe].into())).await.unwrap();
        client.send(WsMessage::Binary(b"ok".to_vec().into())).await.unwrap();
        assert_eq!(socket.recv().await.unwrap().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_ws_peer_close() {
        let (socket, mut client) = pair().await;

        client.close(None).await.unwrap();
        assert_eq!(socket.recv().await.unwrap(), None);
        assert!(!socket.is_open());
        assert!(socket.send("late".into()).await.is_err());
    }
}
