//! Recognition session façade.
//!
//! [`RecognitionSession`] is the surface the UI talks to. It owns no socket
//! itself: all connection work happens on a driver task, and the façade
//! converses with it over an unbounded command channel with oneshot replies.
//!
//! ```text
//!   UI thread                      driver task
//!   ─────────                      ───────────
//!   connect() ──Command::Connect──►  dial / retry / heartbeat
//!   enqueue_frame() ──buffer+notify──►  drain to socket
//!   callbacks ◄──status / result / error / reconnect──┘
//! ```
//!
//! The façade methods are non-blocking in the scheduling sense: they either
//! suspend on a reply (never on socket I/O directly) or, for
//! [`RecognitionSession::enqueue_frame`], take a short buffer lock and
//! return. Dropping the session closes the command channel, which makes the
//! driver shut the socket and stop.
//!
//! Rust guideline compliant 2026-02

mod driver;
mod state;

pub use state::{ConnectionState, ReconnectAttempt, SessionStats, StreamingState};

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::buffer::FrameBuffer;
use crate::callbacks::CallbackRegistry;
use crate::codec::RecognitionResult;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::transport::{Dialer, WsDialer};

use driver::{Command, Reply, SessionDriver};
use state::SharedState;

/// Client-side manager for one streaming recognition connection.
///
/// The session connects to the backend, keeps the connection alive with
/// automatic exponential-backoff reconnection, streams buffered media frames
/// while streaming is active, and dispatches decoded recognition results to
/// registered callbacks. All methods are safe to call from any task; the
/// socket itself is only ever touched by the internal driver.
pub struct RecognitionSession {
    config: SessionConfig,
    dialer: Arc<dyn Dialer>,
    shared: Arc<SharedState>,
    callbacks: Arc<CallbackRegistry>,
    buffer: Arc<Mutex<FrameBuffer>>,
    drain_notify: Arc<Notify>,
    driver_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl RecognitionSession {
    /// Creates a session for the given configuration, using the real
    /// WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailure` when the configuration is invalid.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        Self::with_dialer(config, Arc::new(WsDialer))
    }

    /// Creates a session with a custom transport. Used by tests and by
    /// embedders that tunnel the stream over something other than a direct
    /// WebSocket.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailure` when the configuration is invalid.
    pub fn with_dialer(
        config: SessionConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let buffer = FrameBuffer::new(config.frame_capacity);
        Ok(Self {
            config,
            dialer,
            shared: Arc::new(SharedState::new()),
            callbacks: Arc::new(CallbackRegistry::new()),
            buffer: Arc::new(Mutex::new(buffer)),
            drain_notify: Arc::new(Notify::new()),
            driver_tx: Mutex::new(None),
        })
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Opens the connection and resolves once the initial handshake settles.
    ///
    /// Idempotent: while the session is already Connected or a dial is in
    /// flight, this returns `Ok` without side effects. Called from
    /// Reconnecting it cancels the pending retry timer and dials immediately
    /// with a fresh attempt budget. After the initial handshake fails the
    /// session keeps recovering on its own; progress is reported through the
    /// reconnect callback.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailure` when the first dial of this call fails.
    pub async fn connect(&self) -> Result<(), SessionError> {
        match self.shared.connection_state() {
            ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
            _ => {}
        }
        let cmd_tx = self.ensure_driver();
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(Command::Connect { reply: reply_tx })
            .map_err(|_| SessionError::ConnectionFailure("session task stopped".to_string()))?;
        reply_rx.await.unwrap_or_else(|_| {
            Err(SessionError::ConnectionFailure(
                "session task stopped".to_string(),
            ))
        })
    }

    /// Closes the connection and stops all recovery.
    ///
    /// Always safe: callable from any state, including while a backoff timer
    /// is armed (the timer is cancelled) or while a dial is in flight (the
    /// dial is abandoned). Buffered frames are discarded. Once this returns,
    /// no further callbacks fire.
    pub async fn disconnect(&self) {
        let Some(cmd_tx) = self.current_driver() else {
            return;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if cmd_tx
            .send(Command::Disconnect { reply: reply_tx })
            .is_err()
        {
            return;
        }
        let _ = reply_rx.await;
    }

    /// Starts accepting frames for transmission.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless the session is currently Connected.
    pub async fn start_streaming(&self) -> Result<(), SessionError> {
        self.send_op(|reply| Command::StartStreaming { reply }).await
    }

    /// Stops accepting frames and discards anything still buffered.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless the session is currently Connected.
    pub async fn stop_streaming(&self) -> Result<(), SessionError> {
        self.send_op(|reply| Command::StopStreaming { reply }).await
    }

    /// Tears the connection down and dials again immediately, skipping any
    /// pending backoff delay and resetting the attempt budget.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` when the session is Disconnected, or
    /// `ConnectionFailure` when the immediate dial fails.
    pub async fn force_reconnect(&self) -> Result<(), SessionError> {
        self.send_op(|reply| Command::ForceReconnect { reply }).await
    }

    // ─── Streaming input ────────────────────────────────────────────────────

    /// Offers one media frame for transmission.
    ///
    /// Returns `true` when the frame was accepted into the buffer. Frames are
    /// rejected while streaming is inactive; when the buffer is full the
    /// oldest frame is evicted to make room. Rejections and evictions both
    /// count into [`SessionStats::frames_dropped`]. This call never blocks on
    /// the network.
    pub fn enqueue_frame(&self, payload: impl Into<Bytes>) -> bool {
        let payload = payload.into();
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        {
            let mut buffer = self.buffer.lock().expect("frame buffer poisoned");
            // The streaming flag is checked under the buffer lock: the driver
            // flips the flag off before clearing, so a frame admitted here is
            // always covered by a later clear.
            if !self.shared.is_streaming() {
                self.shared.count_dropped(1);
                return false;
            }
            if buffer.len() == buffer.capacity() {
                self.shared.count_dropped(1);
            }
            buffer.push(payload, timestamp_ms);
        }
        self.shared.count_enqueued();
        self.drain_notify.notify_one();
        true
    }

    // ─── Callback registration ──────────────────────────────────────────────

    /// Registers the connection state listener. One slot; the latest
    /// registration wins.
    pub fn set_on_status_change(&self, callback: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.callbacks.set_on_status(callback);
    }

    /// Registers the recognition result listener (partial and final).
    pub fn set_on_result(&self, callback: impl Fn(RecognitionResult) + Send + Sync + 'static) {
        self.callbacks.set_on_result(callback);
    }

    /// Registers the terminal/backend error listener.
    pub fn set_on_error(&self, callback: impl Fn(SessionError) + Send + Sync + 'static) {
        self.callbacks.set_on_error(callback);
    }

    /// Registers the reconnect progress listener.
    pub fn set_on_reconnect(&self, callback: impl Fn(ReconnectAttempt) + Send + Sync + 'static) {
        self.callbacks.set_on_reconnect(callback);
    }

    // ─── Introspection ──────────────────────────────────────────────────────

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    /// Whether the session is currently Connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Current streaming state.
    #[must_use]
    pub fn streaming_state(&self) -> StreamingState {
        self.shared.streaming_state()
    }

    /// The most recent session error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<SessionError> {
        self.shared.last_error()
    }

    /// Snapshot of the session counters.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// The configuration this session was built with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ─── Driver plumbing ────────────────────────────────────────────────────

    fn current_driver(&self) -> Option<mpsc::UnboundedSender<Command>> {
        let slot = self.driver_tx.lock().expect("driver slot poisoned");
        slot.as_ref().filter(|tx| !tx.is_closed()).cloned()
    }

    /// Returns the live driver sender, spawning the driver task on first
    /// use. Must be called from within a Tokio runtime.
    fn ensure_driver(&self) -> mpsc::UnboundedSender<Command> {
        let mut slot = self.driver_tx.lock().expect("driver slot poisoned");
        if let Some(tx) = slot.as_ref() {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let driver = SessionDriver::new(
            self.config.clone(),
            Arc::clone(&self.dialer),
            Arc::clone(&self.shared),
            Arc::clone(&self.callbacks),
            Arc::clone(&self.buffer),
            Arc::clone(&self.drain_notify),
            cmd_rx,
        );
        tokio::spawn(driver.run());
        *slot = Some(cmd_tx.clone());
        cmd_tx
    }

    async fn send_op(
        &self,
        make: impl FnOnce(Reply) -> Command,
    ) -> Result<(), SessionError> {
        let Some(cmd_tx) = self.current_driver() else {
            return Err(SessionError::NotConnected);
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(make(reply_tx))
            .map_err(|_| SessionError::NotConnected)?;
        reply_rx.await.unwrap_or(Err(SessionError::NotConnected))
    }
}

impl std::fmt::Debug for RecognitionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionSession")
            .field("url", &self.config.url)
            .field("connection", &self.shared.connection_state())
            .field("streaming", &self.shared.streaming_state())
            .finish_non_exhaustive()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
