//! Connection management.
//!
//! XCP disallows request pipelining (at most one request in flight per
//! connection), so unlike a multiplexed client there is no background
//! read loop or pending-request map here: `request` holds the connection
//! mutex for the full round trip.

use crate::error::ClientError;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use xcp_protocol::{
    codec_id, msg_type, Capabilities, CodecRegistry, ErrorCode, Frame, FrameHeader, Nack,
};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Maximum frame size this client will accept or send.
    pub max_frame_bytes: u64,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_frame_bytes: xcp_protocol::DEFAULT_MAX_FRAME_BYTES,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: u64) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

struct Wire {
    stream: TcpStream,
    buf: BytesMut,
}

impl Wire {
    async fn read_frame(&mut self, read_buffer_size: usize, max_frame_bytes: u64) -> Result<Frame, ClientError> {
        let mut scratch = vec![0u8; read_buffer_size];
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf, max_frame_bytes)? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut scratch).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&scratch[..n]);
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let encoded = frame.encode()?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }
}

/// A connection to an XCP server: the TCP socket, the HELLO/CAPS handshake
/// state it negotiated, and the monotonic message-id counter.
pub struct Connection {
    config: ConnectionConfig,
    registry: CodecRegistry,
    wire: Mutex<Option<Wire>>,
    next_msg_id: AtomicU64,
    connected: AtomicBool,
    negotiated_codec: Mutex<Option<u16>>,
    server_capabilities: Mutex<Option<Capabilities>>,
    /// `min(local, server)` frame-size ceiling, set on handshake completion
    /// (§3, §4.4 step 3). Starts at the local configured cap, since no
    /// negotiation has happened yet when the HELLO/CAPS frames themselves
    /// are read.
    max_frame_bytes: AtomicU64,
}

impl Connection {
    /// Creates a new connection (not yet connected) using the default codec
    /// registry in its natural preference order.
    pub fn new(config: ConnectionConfig) -> Self {
        let max_frame_bytes = AtomicU64::new(config.max_frame_bytes);
        Self {
            config,
            registry: CodecRegistry::with_defaults(),
            wire: Mutex::new(None),
            next_msg_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            negotiated_codec: Mutex::new(None),
            server_capabilities: Mutex::new(None),
            max_frame_bytes,
        }
    }

    /// Connects to the server and performs the HELLO/CAPS handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!(addr = %self.config.addr, "connecting");
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        stream.set_nodelay(true).ok();

        let mut wire = Wire {
            stream,
            buf: BytesMut::with_capacity(8192),
        };

        let hello_caps = Capabilities {
            codecs: self.registry.ids(),
            max_frame_bytes: self.config.max_frame_bytes,
            shared_mem: false,
            accepts: vec![],
            emits: vec![],
        };
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::SeqCst);
        let header = FrameHeader::new(msg_type::HELLO, codec_id::JSON, msg_id);
        let hello_frame = Frame::new(header, serde_json::to_vec(&hello_caps)?);

        tokio::time::timeout(self.config.connect_timeout, wire.write_frame(&hello_frame))
            .await
            .map_err(|_| ClientError::Timeout)??;

        let reply = tokio::time::timeout(
            self.config.connect_timeout,
            wire.read_frame(self.config.read_buffer_size, self.config.max_frame_bytes),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;

        if reply.header.msg_type == msg_type::NACK {
            let nack: Nack = serde_json::from_slice(&reply.payload)?;
            let code = ErrorCode::from_u16(nack.error_code).unwrap_or(ErrorCode::CodecUnsupported);
            return Err(ClientError::ServerError {
                code,
                message: "server rejected HELLO".into(),
                retryable: code.is_retryable(),
            });
        }
        if reply.header.msg_type != msg_type::CAPS {
            return Err(ClientError::Protocol(xcp_protocol::ProtocolError::HeaderMalformed(
                format!("expected CAPS, got msg_type {:#06x}", reply.header.msg_type),
            )));
        }

        let server_caps: Capabilities = serde_json::from_slice(&reply.payload)?;
        let negotiated = self
            .registry
            .negotiate(&self.registry.ids(), &server_caps.codecs)
            .ok_or_else(|| ClientError::ServerError {
                code: ErrorCode::CodecUnsupported,
                message: "no codec in common with server".into(),
                retryable: false,
            })?;

        let negotiated_max_frame_bytes = self.config.max_frame_bytes.min(server_caps.max_frame_bytes);

        *self.negotiated_codec.lock().await = Some(negotiated);
        *self.server_capabilities.lock().await = Some(server_caps);
        self.max_frame_bytes.store(negotiated_max_frame_bytes, Ordering::SeqCst);
        *self.wire.lock().await = Some(wire);
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(
            negotiated_codec = negotiated,
            max_frame_bytes = negotiated_max_frame_bytes,
            "handshake complete"
        );
        Ok(())
    }

    /// Sends a frame and waits for the single response frame, under this
    /// connection's request timeout.
    pub async fn request(&self, mut frame: Frame) -> Result<Frame, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let msg_id = self.next_msg_id.fetch_add(1, Ordering::SeqCst);
        frame.header.msg_id = msg_id;

        let mut wire_guard = self.wire.lock().await;
        let wire = wire_guard.as_mut().ok_or(ClientError::NotConnected)?;

        let max_frame_bytes = self.max_frame_bytes.load(Ordering::SeqCst);
        let result = tokio::time::timeout(self.config.request_timeout, async {
            wire.write_frame(&frame).await?;
            wire.read_frame(self.config.read_buffer_size, max_frame_bytes).await
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Returns the codec id negotiated during the handshake, if connected.
    pub async fn negotiated_codec(&self) -> Option<u16> {
        *self.negotiated_codec.lock().await
    }

    /// Returns the server's advertised capabilities, if connected.
    pub async fn server_capabilities(&self) -> Option<Capabilities> {
        self.server_capabilities.lock().await.clone()
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Returns the negotiated frame-size ceiling (`min(local, server)`),
    /// or the local configured cap before a handshake has completed.
    pub fn max_frame_bytes(&self) -> u64 {
        self.max_frame_bytes.load(Ordering::SeqCst)
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(wire) = self.wire.lock().await.take() {
            let mut stream = wire.stream;
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}
