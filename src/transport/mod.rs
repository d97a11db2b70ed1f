//! Socket transport seam.
//!
//! The session driver owns exactly one socket at a time and talks to it
//! through the traits below rather than `tokio-tungstenite` directly. The
//! production implementation lives in [`ws`]; tests drive the full session
//! with scripted implementations of the same traits.
//!
//! # Architecture
//!
//! ```text
//! Dialer (trait)                     one dial per connection attempt
//!     └── dial(url, timeout) ──► (Box<dyn SocketTx>, Box<dyn SocketRx>)
//!
//! SocketTx                           write half, used by drain + heartbeat
//! SocketRx                           read half, polled in the driver select
//! ```
//!
//! The halves are split so the driver can poll the reader in its event loop
//! while branch handlers write frames through the writer.
//!
//! Rust guideline compliant 2026-02

pub mod ws;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use ws::WsDialer;

/// Received socket message.
#[derive(Debug)]
pub enum SocketMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of an open socket.
#[async_trait]
pub trait SocketTx: Send {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Send a pong frame in response to a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    async fn send_pong(&mut self, data: Vec<u8>) -> Result<()>;

    /// Flush pending writes and close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of an open socket.
#[async_trait]
pub trait SocketRx: Send {
    /// Receive the next message, returning `None` when the stream ends.
    async fn recv(&mut self) -> Option<Result<SocketMessage>>;
}

/// Split socket halves as the driver consumes them.
pub type SocketHalves = (Box<dyn SocketTx>, Box<dyn SocketRx>);

/// Opens sockets to the backend.
///
/// One `dial` call corresponds to one connection attempt; the session's
/// backoff and retry logic lives above this seam.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a socket to `url`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the endpoint is unreachable,
    /// the handshake fails, or `timeout` elapses first.
    async fn dial(&self, url: &str, timeout: Duration) -> Result<SocketHalves>;
}
