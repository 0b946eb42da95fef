//! Message-type and codec-id constants, and the JSON shapes of control
//! messages (HELLO/CAPS, PING/PONG, NACK).
//!
//! `msg_type` numbering is a local implementation detail: peers agree on it
//! by linking this crate, not by parsing well-known strings off the wire.
//! There is no cross-implementation numbering requirement.

use serde::{Deserialize, Serialize};

/// Wire `msg_type` values.
pub mod msg_type {
    pub const HELLO: u16 = 0x0001;
    pub const CAPS: u16 = 0x0002;
    pub const DATA: u16 = 0x0003;
    pub const PING: u16 = 0x0004;
    pub const PONG: u16 = 0x0005;
    pub const ACK: u16 = 0x0006;
    pub const NACK: u16 = 0x0007;
    pub const CLARIFY: u16 = 0x0008;
}

/// Wire `codec_id` (`body_codec`) values.
pub mod codec_id {
    pub const JSON: u16 = 0x0001;
    pub const TENSOR_F32: u16 = 0x0002;
    pub const TENSOR_F16: u16 = 0x0003;
    pub const TENSOR_QNT8: u16 = 0x0004;
    pub const BINARY: u16 = 0x0008;
    pub const MIXED_LATENT: u16 = 0x0010;
    pub const ARROW_IPC: u16 = 0x0020;
    pub const DLPACK: u16 = 0x0021;
}

/// Payload of a HELLO or CAPS frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub codecs: Vec<u16>,
    pub max_frame_bytes: u64,
    pub shared_mem: bool,
    #[serde(default)]
    pub accepts: Vec<String>,
    #[serde(default)]
    pub emits: Vec<String>,
}

/// Payload of a PING or PONG frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPong {
    pub nonce: u64,
}

/// Payload of a NACK frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub msg_id: u64,
    pub error_code: u16,
    pub retry_after_ms: u32,
}

impl Nack {
    pub fn new(msg_id: u64, error_code: crate::error::ErrorCode) -> Self {
        Self {
            msg_id,
            error_code: error_code.as_u16(),
            retry_after_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_capabilities_roundtrip() {
        let caps = Capabilities {
            codecs: vec![codec_id::JSON, codec_id::BINARY],
            max_frame_bytes: 1024 * 1024,
            shared_mem: false,
            accepts: vec![],
            emits: vec![],
        };
        let json = serde_json::to_string(&caps).unwrap();
        let decoded: Capabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, caps);
    }

    #[test]
    fn test_nack_shape() {
        let nack = Nack::new(7, ErrorCode::CodecUnsupported);
        assert_eq!(nack.msg_id, 7);
        assert_eq!(nack.error_code, 0x0002);
        assert_eq!(nack.retry_after_ms, 0);
    }

    #[test]
    fn test_ping_pong_payload_equal() {
        let ping = PingPong { nonce: 424242 };
        let pong = ping;
        assert_eq!(ping, pong);
    }
}
