//! JSON wire protocol for relay/origin communication
//!
//! Each frame is a single self-describing JSON record carried in one
//! WebSocket text message, tagged by a mandatory `type` field:
//!
//! ```text
//! {"type":"request","id":"a1b2c3d4e5f60718","method":"GET","path":"/hello.txt"}
//! ```
//!
//! Response bodies travel as base64-encoded `data` frames of at most
//! [`MAX_CHUNK_SIZE`] raw bytes each, bracketed by a `response` frame and an
//! `end` frame with the same request id.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum raw payload per `data` frame (64 KiB before base64 expansion)
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound on an encoded frame accepted by the decoder.
///
/// A full `data` frame is ~87 KiB of base64 plus envelope; anything past this
/// is not a frame the protocol can produce.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// Protocol frames exchanged over the duplex channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Origin -> Relay: opens a session
    Register {
        /// Display path of the shared directory
        path: String,
        /// Requested expiry as seconds since the Unix epoch
        #[serde(rename = "expiresAt")]
        expires_at: i64,
        /// Optional share password (empty means an unauthenticated share)
        #[serde(default, skip_serializing_if = "String::is_empty")]
        password: String,
    },

    /// Relay -> Origin: acknowledges registration
    Registered {
        /// Assigned session identifier
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Public URL viewers should use
        url: String,
    },

    /// Relay -> Origin: forwards a viewer request
    Request {
        /// Session-scoped request identifier
        id: String,
        /// HTTP method (GET or HEAD)
        method: String,
        /// Requested path within the share
        path: String,
    },

    /// Origin -> Relay: starts a response
    Response {
        /// Request identifier being answered
        id: String,
        /// HTTP status code (100-599)
        status: u16,
        /// Response headers
        headers: HashMap<String, String>,
    },

    /// Origin -> Relay: one response body chunk
    Data {
        /// Request identifier being answered
        id: String,
        /// Base64-encoded chunk (empty is valid)
        chunk: String,
    },

    /// Origin -> Relay: completes a response
    End {
        /// Request identifier being completed
        id: String,
    },

    /// Relay -> Origin: session expired, the origin should terminate
    Expired,
}

impl Frame {
    /// The wire name of this frame's type
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Registered { .. } => "registered",
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Data { .. } => "data",
            Self::End { .. } => "end",
            Self::Expired => "expired",
        }
    }

    /// Encode the frame to its JSON wire form
    ///
    /// # Errors
    ///
    /// Returns a protocol error if serialization fails (which only happens
    /// for frames violating [`Frame::validate`]).
    pub fn encode(&self) -> Result<String> {
        self.validate()?;
        serde_json::to_string(self).map_err(|e| Error::protocol(format!("encode failed: {e}")))
    }

    /// Decode a frame from its JSON wire form
    ///
    /// # Errors
    ///
    /// Returns a protocol error on malformed JSON, an unknown `type`, a
    /// missing required field, or an invalid field value.
    pub fn decode(text: &str) -> Result<Self> {
        if text.len() > MAX_FRAME_LEN {
            return Err(Error::protocol(format!(
                "frame too large: {} bytes, max {MAX_FRAME_LEN}",
                text.len()
            )));
        }
        let frame: Self = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("invalid message: {e}")))?;
        frame.validate()?;
        Ok(frame)
    }

    /// Check field-level invariants that the JSON shape alone cannot express
    ///
    /// # Errors
    ///
    /// Returns a protocol error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Register {
                path, expires_at, ..
            } => {
                if path.is_empty() {
                    return Err(Error::protocol("register: path must not be empty"));
                }
                if *expires_at <= 0 {
                    return Err(Error::protocol("register: expiresAt must be positive"));
                }
            }
            Self::Registered { session_id, url } => {
                if session_id.is_empty() {
                    return Err(Error::protocol("registered: sessionId must not be empty"));
                }
                if url.is_empty() {
                    return Err(Error::protocol("registered: url must not be empty"));
                }
            }
            Self::Request { id, method, path } => {
                if id.is_empty() {
                    return Err(Error::protocol("request: id must not be empty"));
                }
                if method != "GET" && method != "HEAD" {
                    return Err(Error::protocol(format!(
                        "request: method must be GET or HEAD, got {method:?}"
                    )));
                }
                if path.is_empty() {
                    return Err(Error::protocol("request: path must not be empty"));
                }
            }
            Self::Response { id, status, .. } => {
                if id.is_empty() {
                    return Err(Error::protocol("response: id must not be empty"));
                }
                if !(100..=599).contains(status) {
                    return Err(Error::protocol(format!(
                        "response: status {status} out of range"
                    )));
                }
            }
            Self::Data { id, .. } | Self::End { id } => {
                if id.is_empty() {
                    return Err(Error::protocol(format!(
                        "{}: id must not be empty",
                        self.kind()
                    )));
                }
            }
            Self::Expired => {}
        }
        Ok(())
    }
}

/// Encode raw chunk bytes as standard padded base64
#[must_use]
pub fn encode_chunk(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 chunk back to raw bytes
///
/// # Errors
///
/// Returns a protocol error if the text is not valid base64.
pub fn decode_chunk(chunk: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(chunk)
        .map_err(|e| Error::protocol(format!("invalid chunk encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to test encode/decode roundtrip
    fn roundtrip(frame: Frame) {
        let encoded = frame.encode().expect("encode failed");
        let decoded = Frame::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, frame, "roundtrip mismatch for {encoded}");
    }

    fn headers() -> HashMap<String, String> {
        HashMap::from([
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Content-Length".to_string(), "15".to_string()),
        ])
    }

    #[test]
    fn test_register_roundtrip() {
        roundtrip(Frame::Register {
            path: "/home/alice/share".to_string(),
            expires_at: 1_735_000_000,
            password: String::new(),
        });

        roundtrip(Frame::Register {
            path: "docs".to_string(),
            expires_at: 1,
            password: "hunter2".to_string(),
        });
    }

    #[test]
    fn test_registered_roundtrip() {
        roundtrip(Frame::Registered {
            session_id: "a1b2c3d4e5f6".to_string(),
            url: "https://fwd.example.com/a1b2c3d4e5f6/".to_string(),
        });
    }

    #[test]
    fn test_request_roundtrip() {
        roundtrip(Frame::Request {
            id: "00ff00ff00ff00ff".to_string(),
            method: "GET".to_string(),
            path: "/hello.txt".to_string(),
        });

        roundtrip(Frame::Request {
            id: "1".to_string(),
            method: "HEAD".to_string(),
            path: "/".to_string(),
        });
    }

    #[test]
    fn test_response_roundtrip() {
        roundtrip(Frame::Response {
            id: "abc".to_string(),
            status: 200,
            headers: headers(),
        });

        // Empty header map is valid; null is not
        roundtrip(Frame::Response {
            id: "abc".to_string(),
            status: 599,
            headers: HashMap::new(),
        });
    }

    #[test]
    fn test_data_roundtrip() {
        roundtrip(Frame::Data {
            id: "abc".to_string(),
            chunk: encode_chunk(b"hello world"),
        });

        // Zero-length chunk is valid (empty files)
        roundtrip(Frame::Data {
            id: "abc".to_string(),
            chunk: String::new(),
        });
    }

    #[test]
    fn test_end_and_expired_roundtrip() {
        roundtrip(Frame::End {
            id: "abc".to_string(),
        });
        roundtrip(Frame::Expired);
    }

    #[test]
    fn test_wire_shape() {
        let encoded = Frame::End {
            id: "abc".to_string(),
        }
        .encode()
        .unwrap();
        assert_eq!(encoded, r#"{"type":"end","id":"abc"}"#);

        let encoded = Frame::Expired.encode().unwrap();
        assert_eq!(encoded, r#"{"type":"expired"}"#);

        // Empty password is omitted from the wire form
        let encoded = Frame::Register {
            path: "x".to_string(),
            expires_at: 10,
            password: String::new(),
        }
        .encode()
        .unwrap();
        assert!(!encoded.contains("password"));
        assert!(encoded.contains("expiresAt"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(Frame::decode("").is_err());
        assert!(Frame::decode("not json").is_err());
        assert!(Frame::decode("{}").is_err());
        assert!(Frame::decode(r#"{"type":"teleport"}"#).is_err());
        assert!(Frame::decode("[1,2,3]").is_err());
    }

    #[test]
    fn test_decode_missing_fields() {
        // Each type with one required field removed must fail
        assert!(Frame::decode(r#"{"type":"register","expiresAt":10}"#).is_err());
        assert!(Frame::decode(r#"{"type":"register","path":"x"}"#).is_err());
        assert!(Frame::decode(r#"{"type":"registered","url":"u"}"#).is_err());
        assert!(Frame::decode(r#"{"type":"registered","sessionId":"s"}"#).is_err());
        assert!(Frame::decode(r#"{"type":"request","method":"GET","path":"/"}"#).is_err());
        assert!(Frame::decode(r#"{"type":"request","id":"a","path":"/"}"#).is_err());
        assert!(Frame::decode(r#"{"type":"request","id":"a","method":"GET"}"#).is_err());
        assert!(Frame::decode(r#"{"type":"response","status":200,"headers":{}}"#).is_err());
        assert!(Frame::decode(r#"{"type":"response","id":"a","headers":{}}"#).is_err());
        assert!(Frame::decode(r#"{"type":"response","id":"a","status":200}"#).is_err());
        assert!(Frame::decode(r#"{"type":"data"}"#).is_err());
        assert!(Frame::decode(r#"{"type":"end"}"#).is_err());
    }

    #[test]
    fn test_decode_null_headers_rejected() {
        assert!(
            Frame::decode(r#"{"type":"response","id":"a","status":200,"headers":null}"#).is_err()
        );
    }

    #[test]
    fn test_decode_empty_chunk_valid() {
        let frame = Frame::decode(r#"{"type":"data","id":"a","chunk":""}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Data {
                id: "a".to_string(),
                chunk: String::new()
            }
        );
    }

    #[test]
    fn test_status_bounds() {
        assert!(Frame::decode(r#"{"type":"response","id":"a","status":0,"headers":{}}"#).is_err());
        assert!(Frame::decode(r#"{"type":"response","id":"a","status":99,"headers":{}}"#).is_err());
        assert!(
            Frame::decode(r#"{"type":"response","id":"a","status":600,"headers":{}}"#).is_err()
        );
        assert!(Frame::decode(r#"{"type":"response","id":"a","status":100,"headers":{}}"#).is_ok());
    }

    #[test]
    fn test_method_restricted() {
        assert!(Frame::decode(r#"{"type":"request","id":"a","method":"POST","path":"/"}"#).is_err());
        assert!(
            Frame::decode(r#"{"type":"request","id":"a","method":"get","path":"/"}"#).is_err()
        );
    }

    #[test]
    fn test_empty_identifiers_rejected() {
        assert!(Frame::decode(r#"{"type":"request","id":"","method":"GET","path":"/"}"#).is_err());
        assert!(Frame::decode(r#"{"type":"end","id":""}"#).is_err());
        assert!(Frame::decode(r#"{"type":"register","path":"","expiresAt":10}"#).is_err());
        assert!(Frame::decode(r#"{"type":"registered","sessionId":"","url":"u"}"#).is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let frame =
            Frame::decode(r#"{"type":"end","id":"a","future":"field"}"#).expect("decode failed");
        assert_eq!(
            frame,
            Frame::End {
                id: "a".to_string()
            }
        );
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let huge = format!(
            r#"{{"type":"data","id":"a","chunk":"{}"}}"#,
            "A".repeat(MAX_FRAME_LEN)
        );
        assert!(Frame::decode(&huge).is_err());
    }

    #[test]
    fn test_chunk_codec() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_chunk(&payload);
        assert_eq!(decode_chunk(&encoded).unwrap(), payload);

        assert_eq!(decode_chunk("").unwrap(), Vec::<u8>::new());
        assert!(decode_chunk("not base64!").is_err());
    }
}
