//! Bounded FIFO for outbound capture frames.
//!
//! When the buffer is full, pushing a new frame silently evicts the oldest
//! one. Memory held is bounded at `capacity` frames regardless of how far
//! the capture source runs ahead of the socket.
//!
//! # Usage in the session
//!
//! The façade appends frames via [`FrameBuffer::push`] while streaming is
//! active; the driver task drains with [`FrameBuffer::pop`] and writes each
//! frame onto the socket. On disconnect or `stop_streaming` the buffer is
//! cleared synchronously — buffered frames are best-effort and never survive
//! a connection.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;

use bytes::Bytes;

/// One opaque capture payload queued for transmission.
///
/// The payload is whatever the capture layer produced (an audio chunk or an
/// image tile); the session never inspects it. Sequence numbers are assigned
/// at enqueue time and strictly increase for the life of the buffer, across
/// evictions and clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Monotonic sequence number, counted from 1.
    pub seq: u64,
    /// Capture timestamp in Unix milliseconds, assigned at enqueue.
    pub timestamp_ms: i64,
    /// Opaque capture payload.
    pub payload: Bytes,
}

/// Fixed-capacity frame queue with oldest-first eviction.
#[derive(Debug)]
pub struct FrameBuffer {
    queue: VecDeque<Frame>,
    capacity: usize,
    next_seq: u64,
    dropped: u64,
}

impl FrameBuffer {
    /// Create a new buffer holding at most `capacity` frames.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "FrameBuffer capacity must be > 0");
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 1,
            dropped: 0,
        }
    }

    /// Append a frame, evicting the oldest one if the buffer is full.
    ///
    /// Returns the sequence number assigned to the new frame. The evicted
    /// frame, if any, is counted in [`FrameBuffer::dropped`].
    pub fn push(&mut self, payload: Bytes, timestamp_ms: i64) -> u64 {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(Frame {
            seq,
            timestamp_ms,
            payload,
        });
        seq
    }

    /// Remove and return the oldest buffered frame.
    pub fn pop(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// Discard all buffered frames without resetting sequence numbering.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Current number of buffered frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if no frames are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Configured maximum capacity in frames.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted by overflow since construction.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
