//! Error taxonomy for recognition sessions.
//!
//! Recoverable transport failures (`ConnectionFailure`, `StreamClosed`) are
//! handled inside the session via the backoff policy and only reach the UI
//! through the informational reconnect callback. `AttemptsExhausted` is the
//! single terminal error, surfaced exactly once per exhaustion through the
//! error callback. `MalformedMessage` never leaves the transport loop: the
//! offending message is logged and dropped.
//!
//! Rust guideline compliant 2026-02

/// Errors that can occur during session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Failed to open a socket to the backend (dial error or handshake
    /// timeout).
    ConnectionFailure(String),
    /// An established connection was closed by the backend or dropped by the
    /// network.
    StreamClosed(String),
    /// A streaming operation was invoked while the session was not connected.
    NotConnected,
    /// Reconnection gave up after the configured number of attempts.
    AttemptsExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },
    /// An inbound message could not be decoded. Logged and dropped, never
    /// dispatched to the error callback.
    MalformedMessage(String),
    /// An error the backend reported over an open connection. Informational;
    /// the connection stays up.
    Backend(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailure(msg) => write!(f, "Connection failed: {msg}"),
            Self::StreamClosed(msg) => write!(f, "Stream closed: {msg}"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::AttemptsExhausted { attempts } => {
                write!(f, "Reconnection gave up after {attempts} attempts")
            }
            Self::MalformedMessage(msg) => write!(f, "Malformed message: {msg}"),
            Self::Backend(msg) => write!(f, "Backend error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    /// Whether the session will try to recover from this error on its own.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConnectionFailure(_) | Self::StreamClosed(_))
    }
}
