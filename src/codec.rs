//! Wire codec for the recognition backend protocol.
//!
//! The backend speaks JSON over WebSocket text frames.
//!
//! # Protocol
//!
//! ```text
//! Client → Server
//!     {"type":"frame","seq":N,"timestamp_ms":T,"payload":"<base64>"}
//!     "ping"                          (heartbeat, literal text)
//!
//! Server → Client
//!     {"type":"connection_established","client_id":...,"message":...}
//!     {"type":"heartbeat","timestamp":...,"status":"alive"}
//!     {"type":"subscription_confirmed",...}
//!     {"type":"echo",...}
//!     {"type":"error","message":...}
//!     {"text":...,"confidence":0.92,"is_emergency":false,"partial":true}
//!     {"gesture_type":...,"confidence":0.88,"handedness":"Right",...}
//! ```
//!
//! Recognition results carry no `type` tag: they are classified by shape
//! (a `text` or `gesture_type` field plus `confidence`). Anything that fits
//! neither family is malformed; the caller logs and drops it without ever
//! crashing the transport loop or reaching the UI.
//!
//! Rust guideline compliant 2026-02

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;

use crate::buffer::Frame;
use crate::error::SessionError;

/// Literal heartbeat text the backend special-cases.
pub const HEARTBEAT_TEXT: &str = "ping";

/// Outbound frame envelope.
#[derive(Debug, Serialize)]
struct FrameEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    seq: u64,
    timestamp_ms: i64,
    payload: &'a str,
}

/// A recognition result delivered by the backend.
///
/// `text` carries the speech transcript or the gesture label, whichever the
/// backend produced. A `Final` closes the current utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionResult {
    /// Interim hypothesis; may be revised by later partials.
    Partial {
        /// Transcript text or gesture label so far.
        text: String,
        /// Backend confidence in `[0, 1]`.
        confidence: f32,
    },
    /// Terminal result for the current utterance.
    Final {
        /// Final transcript text or gesture label.
        text: String,
        /// Backend confidence in `[0, 1]`.
        confidence: f32,
        /// Whether the backend flagged this utterance as an emergency.
        is_emergency: bool,
    },
}

impl RecognitionResult {
    /// Transcript text or gesture label.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Partial { text, .. } | Self::Final { text, .. } => text,
        }
    }

    /// Backend confidence.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Partial { confidence, .. } | Self::Final { confidence, .. } => *confidence,
        }
    }

    /// True for a terminal result.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

/// Informational status message kinds the backend emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Greeting sent right after the socket opens.
    ConnectionEstablished,
    /// Reply to a heartbeat ping.
    Heartbeat,
    /// Stream subscription acknowledged.
    SubscriptionConfirmed,
    /// Echo of an unrecognized client message.
    Echo,
}

/// An informational status message. Logged, never dispatched to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Which status message arrived.
    pub kind: StatusKind,
    /// Server-assigned client id (greeting only).
    pub client_id: Option<String>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Informational status from the backend.
    Status(StatusUpdate),
    /// Partial or final recognition result.
    Result(RecognitionResult),
    /// Error payload reported by the backend.
    ServerError {
        /// Human-readable error message.
        message: String,
    },
}

/// Serializes a frame into its outbound JSON envelope.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    let payload = BASE64.encode(&frame.payload);
    let envelope = FrameEnvelope {
        kind: "frame",
        seq: frame.seq,
        timestamp_ms: frame.timestamp_ms,
        payload: &payload,
    };
    // Serialization of a struct of plain fields cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

/// Classifies one inbound text message.
///
/// # Errors
///
/// Returns `MalformedMessage` for invalid JSON, unknown `type` tags, and
/// objects that match neither the status nor the result shape.
pub fn decode(text: &str) -> Result<Inbound, SessionError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SessionError::MalformedMessage(format!("invalid JSON: {e}")))?;

    let Some(obj) = value.as_object() else {
        return Err(SessionError::MalformedMessage(format!(
            "expected JSON object, got: {value}"
        )));
    };

    if let Some(kind) = obj.get("type").and_then(|t| t.as_str()) {
        return decode_tagged(kind, obj);
    }

    decode_result(obj).map(Inbound::Result)
}

/// Routes a message carrying an explicit `type` tag.
fn decode_tagged(
    kind: &str,
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<Inbound, SessionError> {
    let status = |status_kind: StatusKind| {
        Inbound::Status(StatusUpdate {
            kind: status_kind,
            client_id: obj
                .get("client_id")
                .and_then(|v| v.as_str())
                .map(String::from),
        })
    };

    match kind {
        "connection_established" => Ok(status(StatusKind::ConnectionEstablished)),
        "heartbeat" => Ok(status(StatusKind::Heartbeat)),
        "subscription_confirmed" => Ok(status(StatusKind::SubscriptionConfirmed)),
        "echo" => Ok(status(StatusKind::Echo)),
        "error" => {
            let message = obj
                .get("message")
                .or_else(|| obj.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("unspecified server error")
                .to_string();
            Ok(Inbound::ServerError { message })
        }
        other => Err(SessionError::MalformedMessage(format!(
            "unknown message type: {other}"
        ))),
    }
}

/// Decodes an untagged recognition result by shape.
fn decode_result(
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<RecognitionResult, SessionError> {
    let text = obj
        .get("text")
        .or_else(|| obj.get("gesture_type"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            SessionError::MalformedMessage("result lacks text/gesture_type field".to_string())
        })?
        .to_string();

    let confidence = obj
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| {
            SessionError::MalformedMessage("result lacks numeric confidence".to_string())
        })? as f32;

    let partial = obj
        .get("partial")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    if partial {
        Ok(RecognitionResult::Partial { text, confidence })
    } else {
        let is_emergency = obj
            .get("is_emergency")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        Ok(RecognitionResult::Final {
            text,
            confidence,
            is_emergency,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
