//! Session state types and the shared snapshot read by the façade.
//!
//! The driver task is the only writer; the façade (and through it the UI
//! thread) takes cheap synchronous reads. Callback dispatch does not go
//! through this module — it lives with the driver so ordering follows the
//! transition order exactly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::SessionError;

/// Connection lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected; no socket, no timers.
    #[default]
    Disconnected,
    /// A dial is in flight.
    Connecting,
    /// Socket open and ready.
    Connected,
    /// Waiting out a backoff delay before the next dial.
    Reconnecting,
    /// Terminal failure; only `connect()`/`force_reconnect()` leave it.
    Error,
}

impl ConnectionState {
    /// Lowercase state name as surfaced to status displays and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether capture frames are currently accepted for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingState {
    /// Frames are dropped at the door.
    #[default]
    Idle,
    /// Frames are buffered and drained onto the socket.
    Active,
}

impl StreamingState {
    /// Lowercase state name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
        }
    }
}

impl std::fmt::Display for StreamingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress report for one scheduled reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttempt {
    /// Attempt number, counted from 1.
    pub attempt: u32,
    /// Configured attempt budget.
    pub max_attempts: u32,
    /// Delay before this attempt dials, in milliseconds.
    pub delay_ms: u64,
}

/// Monotonic counters describing a session's lifetime activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Frames accepted by `enqueue_frame`.
    pub frames_enqueued: u64,
    /// Frames rejected (streaming idle) or evicted from the buffer.
    pub frames_dropped: u64,
    /// Frames written onto the socket.
    pub frames_sent: u64,
    /// Recognition results delivered to the result callback.
    pub results_received: u64,
    /// Reconnect attempts scheduled.
    pub reconnects: u64,
}

/// Shared snapshot state: driver writes, façade reads.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    connection: RwLock<ConnectionState>,
    streaming: AtomicBool,
    last_error: RwLock<Option<SessionError>>,
    frames_enqueued: AtomicU64,
    frames_dropped: AtomicU64,
    frames_sent: AtomicU64,
    results_received: AtomicU64,
    reconnects: AtomicU64,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        *self.connection.read().expect("connection state poisoned")
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        *self.connection.write().expect("connection state poisoned") = state;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub(crate) fn streaming_state(&self) -> StreamingState {
        if self.streaming.load(Ordering::SeqCst) {
            StreamingState::Active
        } else {
            StreamingState::Idle
        }
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub(crate) fn set_streaming(&self, active: bool) {
        self.streaming.store(active, Ordering::SeqCst);
    }

    pub(crate) fn last_error(&self) -> Option<SessionError> {
        self.last_error.read().expect("last_error poisoned").clone()
    }

    pub(crate) fn set_last_error(&self, error: Option<SessionError>) {
        *self.last_error.write().expect("last_error poisoned") = error;
    }

    pub(crate) fn count_enqueued(&self) {
        self.frames_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_dropped(&self, n: u64) {
        self.frames_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn count_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_result(&self) {
        self.results_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            results_received: self.results_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
