//! Client error types.

use thiserror::Error;
use xcp_protocol::ErrorCode;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] xcp_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("server error: {code} - {message}")]
    ServerError {
        code: ErrorCode,
        message: String,
        retryable: bool,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::ServerError { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_and_timeout_are_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
    }

    #[test]
    fn test_server_error_retryable_follows_flag() {
        let retryable = ClientError::ServerError {
            code: ErrorCode::MessageTooLarge,
            message: "frame exceeds max_frame_bytes".into(),
            retryable: true,
        };
        assert!(retryable.is_retryable());

        let not_retryable = ClientError::ServerError {
            code: ErrorCode::CodecUnsupported,
            message: "codec not negotiated".into(),
            retryable: false,
        };
        assert!(!not_retryable.is_retryable());
    }
}
