//! WebSocket transport over `tokio-tungstenite`.
//!
//! Thin wrapper providing type-isolated reader/writer halves behind the
//! [`SocketTx`]/[`SocketRx`] traits. The rest of the crate never touches
//! `tokio-tungstenite` types directly, so TLS configuration and timeout
//! handling stay in one place.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite;

use super::{Dialer, SocketHalves, SocketMessage, SocketRx, SocketTx};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

#[async_trait]
impl SocketTx for WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket send_pong failed")
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

#[async_trait]
impl SocketRx for WsReader {
    /// Receive the next message. Raw `Frame` variants are skipped internally.
    async fn recv(&mut self) -> Option<Result<SocketMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(SocketMessage::Text(text)));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(SocketMessage::Binary(data)));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(SocketMessage::Ping(data)));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(SocketMessage::Pong(data)));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map_or((1005, String::new()), |cf| {
                            (cf.code.into(), cf.reason.to_string())
                        });
                    return Some(Ok(SocketMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => {
                    // Raw frames — skip
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Production dialer: tokio-tungstenite with rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str, timeout: Duration) -> Result<SocketHalves> {
        use tungstenite::client::IntoClientRequest;

        let request = url
            .into_client_request()
            .with_context(|| format!("invalid WebSocket URL: {url}"))?;

        let connect = tokio_tungstenite::connect_async(request);
        let (ws_stream, _response) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| anyhow::anyhow!("WebSocket connect timed out after {timeout:?}"))?
            .context("WebSocket connect failed")?;

        let (sink, stream) = ws_stream.split();

        Ok((
            Box::new(WsWriter { sink }),
            Box::new(WsReader { stream }),
        ))
    }
}
