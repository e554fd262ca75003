//! Wire messages for the streaming entry point.
//!
//! Inbound and outbound shapes mirror the kiosk client protocol:
//! frames arrive as base64 text, results fan out as tagged JSON.

use serde::{Deserialize, Serialize};

/// Messages a streaming client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    /// A camera frame to identify.
    Frame {
        #[serde(rename = "deviceId", default)]
        device_id: Option<String>,
        /// Base64-encoded image bytes, optionally wrapped in a
        /// `data:image/...;base64,` URL.
        #[serde(default)]
        image: String,
    },
    /// Liveness probe.
    Ping,
}

/// Messages the server sends back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    /// Handshake accepted; the connection joined its device room.
    Ack {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    Pong,
    /// Frame dropped by the per-device rate limit.
    Throttle {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    /// Identification result, broadcast to the whole device room.
    Result {
        #[serde(rename = "deviceId")]
        device_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        identity_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<f32>,
        cached: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Message-level error, answered inline without closing.
    Error { message: String },
}

/// Device id from the handshake message, tolerating any JSON object.
/// A missing or empty id falls back to `"default"`.
pub fn handshake_device_id(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("deviceId").and_then(|d| d.as_str()).map(String::from))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

/// Strip a `data:...;base64,` prefix, if present.
pub fn strip_data_url(b64: &str) -> &str {
    if b64.starts_with("data:") {
        if let Some((_, rest)) = b64.split_once(',') {
            return rest;
        }
    }
    b64
}
