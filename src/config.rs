//! Session configuration.
//!
//! All tuning knobs are injected at construction time. There is no file or
//! environment based loading: the embedding application owns persistence and
//! hands a ready `SessionConfig` to [`crate::RecognitionSession::new`].

use std::time::Duration;

use crate::error::SessionError;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default ceiling for the exponential backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default frame buffer capacity, in frames.
pub const DEFAULT_FRAME_CAPACITY: usize = 256;

/// Default timeout for a single socket-open attempt.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default interval between heartbeat pings while connected.
///
/// The backend times out clients after 60s of silence, so ping at half that.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Configuration for a recognition session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Backend streaming endpoint. `ws://`/`wss://` are used verbatim;
    /// `http://`/`https://` are rewritten to the corresponding socket scheme.
    pub url: String,
    /// Delay before the first reconnect attempt; doubles on each failure.
    pub base_delay: Duration,
    /// Upper bound for the backoff delay.
    pub max_delay: Duration,
    /// Reconnect attempts before the session enters the terminal error state.
    pub max_attempts: u32,
    /// Maximum number of frames held while waiting to drain onto the socket.
    /// When full, the oldest frame is evicted.
    pub frame_capacity: usize,
    /// Timeout for a single socket-open attempt.
    pub connect_timeout: Duration,
    /// Interval between heartbeat pings while connected.
    pub heartbeat_interval: Duration,
    /// Apply a symmetric ±10% jitter to reconnect delays.
    pub jitter: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            jitter: false,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration for the given endpoint with default tuning.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailure` when the endpoint is empty or a tuning
    /// value is zero where zero cannot work (capacity, attempts, delays).
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.url.is_empty() {
            return Err(SessionError::ConnectionFailure(
                "endpoint URL is empty".to_string(),
            ));
        }
        if self.frame_capacity == 0 {
            return Err(SessionError::ConnectionFailure(
                "frame_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(SessionError::ConnectionFailure(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay.is_zero() {
            return Err(SessionError::ConnectionFailure(
                "base_delay must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(SessionError::ConnectionFailure(
                "heartbeat_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the endpoint with HTTP schemes rewritten to socket schemes.
    #[must_use]
    pub fn socket_url(&self) -> String {
        self.url
            .replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}
