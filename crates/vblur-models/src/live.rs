//! Live WebSocket message types.
//!
//! These messages keep the JSON shapes used by the browser client:
//! - client → server: `{frame, classes_no_blur}` or `{type: "pong"}`
//! - server → client: `{frame}`, `{error}` or `{type: "ping"}`

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keepalive probe kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeepaliveKind {
    Ping,
    Pong,
}

/// Message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Processed frame, base64 JPEG
    Frame { frame: String },
    /// Per-message failure
    Error { error: String },
    /// Liveness probe
    Keepalive {
        #[serde(rename = "type")]
        kind: KeepaliveKind,
    },
}

impl ServerMessage {
    /// Create a frame message.
    pub fn frame(encoded: impl Into<String>) -> Self {
        ServerMessage::Frame {
            frame: encoded.into(),
        }
    }

    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: message.into(),
        }
    }

    /// Create a keepalive ping.
    pub fn ping() -> Self {
        ServerMessage::Keepalive {
            kind: KeepaliveKind::Ping,
        }
    }

    /// Short name used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Frame { .. } => "frame",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Keepalive { .. } => "ping",
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> String {
        // Only strings and unit enums: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"Internal error"}"#.to_string())
    }
}

/// A validated frame request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    /// Base64-encoded image
    pub frame: String,
    /// Raw class names, not yet normalized
    pub classes_no_blur: Vec<String>,
}

/// Message received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Keepalive acknowledgment
    Pong,
    /// Frame to process
    Frame(FrameRequest),
}

/// Reasons a client message is rejected before processing.
#[derive(Debug, Error)]
pub enum ClientMessageError {
    #[error("Invalid JSON data")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Missing frame or classes_no_blur")]
    MissingFields,

    #[error("Invalid message fields: {0}")]
    InvalidFields(#[source] serde_json::Error),
}

/// Wire shape before validation; every field optional.
#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    frame: Option<String>,
    #[serde(default)]
    classes_no_blur: Option<Vec<String>>,
}

impl ClientMessage {
    /// Parse and validate one text message.
    pub fn parse(text: &str) -> Result<Self, ClientMessageError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(ClientMessageError::InvalidJson)?;

        if !value.is_object() {
            return Err(ClientMessageError::MissingFields);
        }

        let raw: RawClientMessage =
            serde_json::from_value(value).map_err(ClientMessageError::InvalidFields)?;

        if raw.kind.as_deref() == Some("pong") {
            return Ok(ClientMessage::Pong);
        }

        match (raw.frame, raw.classes_no_blur) {
            (Some(frame), Some(classes)) if !frame.is_empty() && !classes.is_empty() => {
                Ok(ClientMessage::Frame(FrameRequest {
                    frame,
                    classes_no_blur: classes,
                }))
            }
            _ => Err(ClientMessageError::MissingFields),
        }
    }
}
