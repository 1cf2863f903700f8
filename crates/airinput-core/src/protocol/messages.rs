//! JSON message types exchanged between devices, the relay, and the desktop.
//!
//! Every payload that crosses the wire is a small JSON object.  The streamed
//! events pushed to clients and the bodies of inbound push requests share the
//! same shape:
//!
//! ```json
//! {"type":"text","data":"hello wor"}
//! ```
//!
//! # Message flow
//!
//! ```text
//! Mobile  → Relay:   POST /ws/message     {"type":"text","data":"<delta>"}
//! Relay   → All:     SSE event "message"  {"type":"text","data":"<full buffer>"}
//! Relay   → All:     SSE event "message"  {"type":"card","data":"<card>"}
//! ```
//!
//! The other request bodies (`SegmentRequest`, `ModeRequest`) are plain
//! structs because they are only ever received, never streamed.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors produced while decoding a wire message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The body was not valid JSON, or did not have the `{type, data}` shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ── Message kind ──────────────────────────────────────────────────────────────

/// The nine message kinds understood by every client.
///
/// Serialized in `snake_case`, so `ClearInput` travels as `"clear_input"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Incremental text (inbound) or the full current buffer (outbound).
    Text,
    /// Keepalive; carries no information.
    Heartbeat,
    /// A card produced by the idle timer (continuous mode).
    Segment,
    /// A card produced by an explicit device request (single mode).
    Card,
    /// Tells clients to clear their input display.
    ClearInput,
    /// `"true"` to show the discoverability code, `"false"` to hide it.
    ShowCode,
    /// First event on a new stream.
    Connected,
    /// Current segmentation mode, sent on query and after timer segmentation.
    ModeSync,
    /// Acknowledges a mode change.
    ModeAck,
}

impl MessageKind {
    /// Returns the wire name of this kind (e.g. `"clear_input"`).
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Segment => "segment",
            MessageKind::Card => "card",
            MessageKind::ClearInput => "clear_input",
            MessageKind::ShowCode => "show_code",
            MessageKind::Connected => "connected",
            MessageKind::ModeSync => "mode_sync",
            MessageKind::ModeAck => "mode_ack",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// An immutable `{kind, payload}` value.
///
/// Fields are private so a message cannot be altered after construction; it
/// is cloned (cheaply, one `String`) once per recipient when broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: MessageKind,
    /// Absent `data` in an inbound body is treated as an empty string.
    #[serde(default)]
    data: String,
}

impl Message {
    /// Creates a message of the given kind.
    pub fn new(kind: MessageKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        Self::new(MessageKind::Text, data)
    }

    pub fn card(data: impl Into<String>) -> Self {
        Self::new(MessageKind::Card, data)
    }

    pub fn segment(data: impl Into<String>) -> Self {
        Self::new(MessageKind::Segment, data)
    }

    pub fn clear_input() -> Self {
        Self::new(MessageKind::ClearInput, "")
    }

    /// `show == true` asks clients to display the discoverability code.
    pub fn show_code(show: bool) -> Self {
        Self::new(MessageKind::ShowCode, if show { "true" } else { "false" })
    }

    pub fn mode_sync(mode: impl Into<String>) -> Self {
        Self::new(MessageKind::ModeSync, mode)
    }

    pub fn mode_ack(mode: impl Into<String>) -> Self {
        Self::new(MessageKind::ModeAck, mode)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Parses an inbound request body.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Malformed`] if the body is not a JSON object
    /// with a known `type`.
    pub fn from_json(body: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Serializes the message to its wire form.
    ///
    /// # Errors
    ///
    /// Serialization of this struct cannot fail in practice, but the
    /// `serde_json` signature is preserved rather than unwrapped.
    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Request / response bodies ─────────────────────────────────────────────────

/// Body of a device-driven segmentation request: `{"content": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRequest {
    #[serde(default)]
    pub content: String,
}

/// Body of a mode change request: `{"mode": "single" | "continuous"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

/// Response to a mode query: `{"mode": "single" | "continuous"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeResponse {
    pub mode: String,
}

/// Payload of the `connected` event that opens every stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    pub id: String,
    pub ip: String,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_with_type_and_data_fields() {
        // Arrange
        let msg = Message::card("hello");

        // Act
        let json = msg.to_json().unwrap();

        // Assert
        assert_eq!(json, r#"{"type":"card","data":"hello"}"#);
    }

    #[test]
    fn test_clear_input_kind_uses_snake_case_on_the_wire() {
        let json = Message::clear_input().to_json().unwrap();
        assert_eq!(json, r#"{"type":"clear_input","data":""}"#);
    }

    #[test]
    fn test_from_json_parses_inbound_text_delta() {
        let msg = Message::from_json(br#"{"type":"text","data":"abc"}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::Text);
        assert_eq!(msg.data(), "abc");
    }

    #[test]
    fn test_from_json_missing_data_defaults_to_empty() {
        let msg = Message::from_json(br#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::Heartbeat);
        assert_eq!(msg.data(), "");
    }

    #[test]
    fn test_from_json_rejects_unknown_kind() {
        let result = Message::from_json(br#"{"type":"shout","data":"x"}"#);
        assert!(matches!(result, Err(MessageError::Malformed(_))));
    }

    #[test]
    fn test_from_json_rejects_non_json_body() {
        assert!(Message::from_json(b"not json").is_err());
    }

    #[test]
    fn test_show_code_payload_is_boolean_string() {
        assert_eq!(Message::show_code(true).data(), "true");
        assert_eq!(Message::show_code(false).data(), "false");
    }

    #[test]
    fn test_message_kind_display_matches_serde_name() {
        // The Display impl is used in log lines; it must agree with the wire name.
        for kind in [
            MessageKind::Text,
            MessageKind::Heartbeat,
            MessageKind::Segment,
            MessageKind::Card,
            MessageKind::ClearInput,
            MessageKind::ShowCode,
            MessageKind::Connected,
            MessageKind::ModeSync,
            MessageKind::ModeAck,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_segment_request_missing_content_defaults_to_empty() {
        let req: SegmentRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.content, "");
    }
}
