//! High-level client API: handshake, Ether exchange, and codec metrics.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use std::sync::atomic::{AtomicU64, Ordering};
use xcp_protocol::{codec_id, msg_type, Ether, Frame, FrameHeader, PingPong, JSON_OVERUSE_THRESHOLD_BYTES};

/// Per-codec usage counters backing `codec_metrics`.
#[derive(Debug, Default)]
struct CodecUsage {
    json_requests: AtomicU64,
    binary_requests: AtomicU64,
    total_bytes: AtomicU64,
}

/// High-level client for an XCP server: one TCP connection, the HELLO/CAPS
/// handshake it negotiated, and codec usage tracking for `send_ether`'s
/// smart codec selection.
pub struct Client {
    conn: Connection,
    usage: CodecUsage,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config),
            usage: CodecUsage::default(),
        }
    }

    /// Connects to the server and performs the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Sends a frame and waits for the response, bypassing Ether encoding.
    pub async fn request(&self, frame: Frame) -> Result<Frame, ClientError> {
        self.conn.request(frame).await
    }

    /// Pings the server and returns the PONG frame, so callers can observe
    /// `in_reply_to` and the echoed nonce themselves.
    pub async fn ping(&self) -> Result<Frame, ClientError> {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let ping = PingPong { nonce };
        let header = FrameHeader::new(msg_type::PING, codec_id::JSON, 0);
        let frame = Frame::new(header, serde_json::to_vec(&ping)?);

        let reply = self.conn.request(frame).await?;
        self.check_reply_not_nack(&reply)?;
        let pong: PingPong = serde_json::from_slice(&reply.payload)?;
        if pong.nonce != nonce {
            return Err(ClientError::Protocol(
                xcp_protocol::ProtocolError::HeaderMalformed("PONG nonce did not match PING".into()),
            ));
        }
        Ok(reply)
    }

    /// Sends an `Ether` envelope, selecting a codec automatically unless
    /// `codec_id` is given. Envelopes estimated under
    /// [`JSON_OVERUSE_THRESHOLD_BYTES`] use JSON; larger ones use the
    /// negotiated binary codec. Returns the response frame so callers can
    /// observe its header (`in_reply_to`, `body_codec`); use
    /// [`Client::decode_ether`] to recover the `Ether` from it.
    pub async fn send_ether(&self, ether: &Ether, codec_id: Option<u16>) -> Result<Frame, ClientError> {
        let negotiated = self
            .conn
            .negotiated_codec()
            .await
            .ok_or(ClientError::NotConnected)?;

        let estimated_size = serde_json::to_vec(ether)?.len() as u64;
        let chosen_codec = codec_id.unwrap_or(if estimated_size < JSON_OVERUSE_THRESHOLD_BYTES {
            xcp_protocol::codec_id::JSON
        } else {
            negotiated
        });

        self.record_usage(chosen_codec, estimated_size);

        let codec = self
            .conn
            .registry()
            .get(chosen_codec)
            .ok_or(ClientError::Protocol(xcp_protocol::ProtocolError::UnsupportedCodec(
                chosen_codec,
            )))?;
        let payload = codec.encode(ether)?;

        let header = FrameHeader::new(msg_type::DATA, chosen_codec, 0);
        let frame = Frame::new(header, payload);

        let reply = self.conn.request(frame).await?;
        self.check_reply_not_nack(&reply)?;
        Ok(reply)
    }

    /// Decodes a DATA reply frame (as returned by [`Client::send_ether`])
    /// back into an `Ether`, using the codec named in its `body_codec`.
    pub fn decode_ether(&self, reply: &Frame) -> Result<Ether, ClientError> {
        let reply_codec = self
            .conn
            .registry()
            .get(reply.header.body_codec)
            .ok_or(ClientError::Protocol(xcp_protocol::ProtocolError::UnsupportedCodec(
                reply.header.body_codec,
            )))?;
        Ok(reply_codec.decode(&reply.payload)?)
    }

    /// Sends a raw payload directly, bypassing `Ether` encoding — for
    /// benchmarking codec throughput without envelope overhead.
    pub async fn send_raw_payload(&self, payload: Vec<u8>, codec_id: u16) -> Result<Vec<u8>, ClientError> {
        self.record_usage(codec_id, payload.len() as u64);
        let header = FrameHeader::new(msg_type::DATA, codec_id, 0);
        let frame = Frame::new(header, payload);
        let reply = self.conn.request(frame).await?;
        self.check_reply_not_nack(&reply)?;
        Ok(reply.payload.to_vec())
    }

    fn check_reply_not_nack(&self, reply: &Frame) -> Result<(), ClientError> {
        if reply.header.msg_type == msg_type::NACK {
            let nack: xcp_protocol::Nack = serde_json::from_slice(&reply.payload)?;
            let code = xcp_protocol::ErrorCode::from_u16(nack.error_code)
                .unwrap_or(xcp_protocol::ErrorCode::SchemaUnknown);
            return Err(ClientError::ServerError {
                code,
                message: format!("server sent NACK for msg_id {}", nack.msg_id),
                retryable: code.is_retryable(),
            });
        }
        Ok(())
    }

    fn record_usage(&self, codec_id: u16, bytes: u64) {
        if codec_id == xcp_protocol::codec_id::JSON {
            self.usage.json_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.usage.binary_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.usage.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Returns codec usage statistics since this client was created.
    ///
    /// `protobuf_percentage` covers every non-JSON codec actually used, not
    /// literal Protobuf traffic — XCP's mandatory binary codec is TLV, not
    /// Protobuf, but downstream dashboards built against the v0.2 client
    /// read this field name.
    pub fn codec_metrics(&self) -> CodecMetrics {
        let json = self.usage.json_requests.load(Ordering::Relaxed);
        let binary = self.usage.binary_requests.load(Ordering::Relaxed);
        let total_requests = json + binary;
        let total_bytes = self.usage.total_bytes.load(Ordering::Relaxed);

        if total_requests == 0 {
            return CodecMetrics {
                json_percentage: 0.0,
                protobuf_percentage: 0.0,
                total_bytes: 0,
                total_requests: 0,
            };
        }

        CodecMetrics {
            json_percentage: (json as f64 / total_requests as f64) * 100.0,
            protobuf_percentage: (binary as f64 / total_requests as f64) * 100.0,
            total_bytes,
            total_requests,
        }
    }

    /// Returns whether JSON usage exceeds `threshold` percent of requests.
    pub fn check_json_overuse(&self, threshold: f64) -> bool {
        self.codec_metrics().json_percentage > threshold
    }
}

/// Codec usage statistics returned by [`Client::codec_metrics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecMetrics {
    pub json_percentage: f64,
    pub protobuf_percentage: f64,
    pub total_bytes: u64,
    pub total_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = ConnectionConfig::new("127.0.0.1:7220".parse().unwrap());
        let client = Client::new(config);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_metrics_start_at_zero() {
        let config = ConnectionConfig::new("127.0.0.1:7220".parse().unwrap());
        let client = Client::new(config);
        let metrics = client.codec_metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.json_percentage, 0.0);
        assert!(!client.check_json_overuse(1.0));
    }

    #[test]
    fn test_metrics_track_codec_split() {
        let config = ConnectionConfig::new("127.0.0.1:7220".parse().unwrap());
        let client = Client::new(config);
        client.record_usage(xcp_protocol::codec_id::JSON, 100);
        client.record_usage(xcp_protocol::codec_id::JSON, 100);
        client.record_usage(xcp_protocol::codec_id::BINARY, 4000);

        let metrics = client.codec_metrics();
        assert_eq!(metrics.total_requests, 3);
        assert!((metrics.json_percentage - 66.666).abs() < 0.01);
        assert!((metrics.protobuf_percentage - 33.333).abs() < 0.01);
        assert_eq!(metrics.total_bytes, 4200);
        assert!(client.check_json_overuse(1.0));
        assert!(!client.check_json_overuse(90.0));
    }
}
