//! Protocol error types and wire-level error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while framing or decoding XCP traffic.
///
/// Frame-layer variants (`BadMagic`, `BadVersion`, `BadCrc`, `UnexpectedEof`,
/// `FrameTooLarge`, `HeaderMalformed`) are connection-fatal: a caller that
/// receives one must close the connection without attempting further reads.
/// Application-layer variants (`UnsupportedCodec`, `SchemaUnknown`,
/// `KindMismatch`) are recoverable: the session stays open and a NACK is sent.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad magic: expected {expected:#x}, got {actual:#x}")]
    BadMagic { expected: u32, actual: u32 },

    #[error("unsupported version byte: {0:#x}")]
    BadVersion(u8),

    #[error("CRC32C mismatch: expected {expected:#x}, got {actual:#x}")]
    BadCrc { expected: u32, actual: u32 },

    #[error("unexpected EOF from peer mid-frame")]
    UnexpectedEof,

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("malformed frame header: {0}")]
    HeaderMalformed(String),

    #[error("unsupported codec id: {0:#06x}")]
    UnsupportedCodec(u16),

    #[error("unknown schema: {0}")]
    SchemaUnknown(String),

    #[error("kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Whether this error terminates the connection (frame-layer) or merely
    /// warrants a NACK while the session stays open (application-layer).
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadMagic { .. }
                | ProtocolError::BadVersion(_)
                | ProtocolError::BadCrc { .. }
                | ProtocolError::UnexpectedEof
                | ProtocolError::FrameTooLarge { .. }
                | ProtocolError::HeaderMalformed(_)
        )
    }

    /// Maps an application-layer error to the wire `ErrorCode` carried in a NACK.
    /// Returns `None` for frame-layer errors, which never produce a NACK.
    pub fn wire_code(&self) -> Option<ErrorCode> {
        match self {
            ProtocolError::UnsupportedCodec(_) => Some(ErrorCode::CodecUnsupported),
            ProtocolError::SchemaUnknown(_) => Some(ErrorCode::SchemaUnknown),
            ProtocolError::KindMismatch { .. } => Some(ErrorCode::KindMismatch),
            ProtocolError::FrameTooLarge { .. } => Some(ErrorCode::MessageTooLarge),
            _ => None,
        }
    }
}

/// Numeric error codes carried in a NACK's `error_code` field.
///
/// These are part of the wire contract (§7 of the protocol) and must not
/// be renumbered once a peer may depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Ok = 0x0000,
    SchemaUnknown = 0x0001,
    CodecUnsupported = 0x0002,
    MessageTooLarge = 0x0003,
    KindMismatch = 0x0004,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(ErrorCode::Ok),
            0x0001 => Some(ErrorCode::SchemaUnknown),
            0x0002 => Some(ErrorCode::CodecUnsupported),
            0x0003 => Some(ErrorCode::MessageTooLarge),
            0x0004 => Some(ErrorCode::KindMismatch),
            _ => None,
        }
    }

    /// Whether a client may reasonably retry after receiving this code.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::MessageTooLarge)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Ok => write!(f, "OK"),
            ErrorCode::SchemaUnknown => write!(f, "ERR_SCHEMA_UNKNOWN"),
            ErrorCode::CodecUnsupported => write!(f, "ERR_CODEC_UNSUPPORTED"),
            ErrorCode::MessageTooLarge => write!(f, "ERR_MESSAGE_TOO_LARGE"),
            ErrorCode::KindMismatch => write!(f, "ERR_KIND_MISMATCH"),
        }
    }
}
