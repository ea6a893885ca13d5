// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client-daemon protocol over Unix domain sockets.
//!
//! Messages are newline-delimited JSON. The client sends a [`Request`]
//! and the daemon replies with a [`Response`].

use crate::button::Gesture;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests (client -> Daemon)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Current fan speeds and control state.
    #[serde(rename = "get_status")]
    GetStatus,

    /// Flip automatic fan control, as a `switch` action would.
    #[serde(rename = "toggle_fan")]
    ToggleFan,

    /// Handle a gesture as if the button produced it.
    #[serde(rename = "gesture")]
    Gesture { gesture: Gesture },
}

// ---------------------------------------------------------------------------
// Responses (Daemon -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "status")]
    Status {
        cpu_percent: f64,
        disk_percent: f64,
        /// Whether the curves are driving the fans.
        enabled: bool,
    },

    /// Operation succeeded.
    #[serde(rename = "ok")]
    Ok { message: String },

    /// Operation failed.
    #[serde(rename = "error")]
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Encode a message as a newline-delimited JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string(msg)?;
    s.push('\n');
    Ok(s)
}

/// Decode a message from a JSON string (newline-trimmed).
pub fn decode<'a, T: Deserialize<'a>>(s: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(s.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gesture_request_wire_format() {
        let line = encode(&Request::Gesture {
            gesture: Gesture::LongPress,
        })
        .unwrap();
        assert_eq!(line, "{\"type\":\"gesture\",\"gesture\":\"press\"}\n");
    }

    #[test]
    fn test_decode_trims_newline() {
        let req: Request = decode("{\"type\":\"toggle_fan\"}\n").unwrap();
        assert_eq!(req, Request::ToggleFan);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(decode::<Request>("{\"type\":\"set_manual\"}").is_err());
    }
}
