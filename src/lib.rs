//! Recolink - Streaming recognition session client.
//!
//! This crate provides the client-side session layer for real-time speech
//! and gesture recognition: it opens a WebSocket to the recognition backend,
//! streams captured media frames, and delivers decoded results to the UI.
//!
//! # Architecture
//!
//! The crate follows a single-owner driver pattern:
//!
//! - **RecognitionSession** - UI-facing façade, forwards commands to the driver
//! - **SessionDriver** - Spawned task, owns the socket, timers and reconnection
//! - **FrameBuffer** - Bounded FIFO between capture and the socket drain
//! - **BackoffPolicy** - Pure exponential-delay schedule for reconnects
//! - **Codec** - Wire envelope encoding and inbound message classification
//!
//! # Modules
//!
//! - [`session`] - Session façade, state machine and shared state
//! - [`transport`] - Socket seam and the tokio-tungstenite transport
//! - [`codec`] - Frame envelope and inbound decoding
//! - [`config`] - Session tuning knobs

// Library modules
pub mod backoff;
pub mod buffer;
pub mod callbacks;
pub mod codec;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use buffer::Frame;
pub use codec::RecognitionResult;
pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{
    ConnectionState, ReconnectAttempt, SessionStats, StreamingState,
};

// Re-export the session façade
pub use session::RecognitionSession;
