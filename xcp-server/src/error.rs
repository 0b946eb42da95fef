//! Server error types.

use thiserror::Error;
use xcp_protocol::ErrorCode;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] xcp_protocol::ProtocolError),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Maps this error onto the wire error code carried by a NACK frame, if
    /// any — connection-fatal protocol errors have no wire representation
    /// because the connection is torn down before a NACK could be sent.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ServerError::Protocol(e) => e.wire_code(),
            ServerError::HandshakeFailed(_) => Some(ErrorCode::CodecUnsupported),
            ServerError::Io(_) | ServerError::ShuttingDown => None,
        }
    }

    /// Whether the connection must be closed after this error, as opposed
    /// to continuing to serve the session after a NACK.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            ServerError::Protocol(e) => e.is_connection_fatal(),
            ServerError::HandshakeFailed(_) => true,
            ServerError::Io(_) | ServerError::ShuttingDown => true,
        }
    }
}
