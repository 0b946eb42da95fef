//! Per-connection protocol handler: handshake, DATA dispatch, PING/PONG.
//!
//! A `ConnectionHandler` is stateless with respect to any one connection —
//! all per-connection state lives in the `Session` passed into each method.
//! One handler is shared (via `Arc`) across every connection the server
//! accepts.

use crate::error::ServerError;
use crate::session::Session;
use std::sync::Arc;
use xcp_protocol::{
    codec_id, msg_type, Capabilities, CodecRegistry, ErrorCode, Ether, Frame, FrameHeader, Nack,
    PingPong,
};

/// Outcome of processing a HELLO frame.
pub enum HandshakeOutcome {
    /// Codec negotiation succeeded; `Frame` is the CAPS reply to send.
    Established(Frame),
    /// Codec intersection was empty; `Frame` is the NACK to send before the
    /// caller closes the connection.
    Rejected(Frame),
}

/// Application callback invoked with a decoded `Ether` from a DATA frame;
/// returns the `Ether` to send back, encoded with the same codec as the
/// request. Defaults to an echo if the server is built with no callback.
pub type EtherCallback = dyn Fn(&Ether) -> Ether + Send + Sync;

pub struct ConnectionHandler {
    registry: Arc<CodecRegistry>,
    local_codec_preference: Vec<u16>,
    local_max_frame_bytes: u64,
    accepts: Vec<String>,
    emits: Vec<String>,
    on_ether: Option<Arc<EtherCallback>>,
}

impl ConnectionHandler {
    pub fn new(registry: Arc<CodecRegistry>, local_max_frame_bytes: u64) -> Self {
        let local_codec_preference = registry.ids();
        Self {
            registry,
            local_codec_preference,
            local_max_frame_bytes,
            accepts: Vec::new(),
            emits: Vec::new(),
            on_ether: None,
        }
    }

    /// Overrides codec preference order used during negotiation. Defaults to
    /// the registry's natural (sorted-by-id) order.
    pub fn with_local_preference(mut self, preference: Vec<u16>) -> Self {
        self.local_codec_preference = preference;
        self
    }

    pub fn with_accepts(mut self, accepts: Vec<String>) -> Self {
        self.accepts = accepts;
        self
    }

    pub fn with_emits(mut self, emits: Vec<String>) -> Self {
        self.emits = emits;
        self
    }

    /// Installs the Ether-level callback invoked for each DATA frame.
    /// Without one, `handle_data` echoes the request Ether back unchanged.
    pub fn with_ether_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Ether) -> Ether + Send + Sync + 'static,
    {
        self.on_ether = Some(Arc::new(callback));
        self
    }

    fn local_capabilities(&self, max_frame_bytes: u64) -> Capabilities {
        Capabilities {
            codecs: self.local_codec_preference.clone(),
            max_frame_bytes,
            shared_mem: false,
            accepts: self.accepts.clone(),
            emits: self.emits.clone(),
        }
    }

    /// Builds a NACK frame replying to `request_header`.
    fn nack_frame(&self, session: &Session, request_header: &FrameHeader, code: ErrorCode) -> Frame {
        let nack = Nack::new(request_header.msg_id, code);
        let header = FrameHeader::reply_to(request_header, msg_type::NACK, session.next_msg_id());
        Frame::new(header, serde_json::to_vec(&nack).unwrap_or_default())
    }

    /// Handles a HELLO frame, negotiating the codec set and frame-size cap.
    pub fn handle_hello(
        &self,
        session: &mut Session,
        frame: &Frame,
    ) -> Result<HandshakeOutcome, ServerError> {
        let peer_caps: Capabilities = serde_json::from_slice(&frame.payload)
            .map_err(|e| ServerError::HandshakeFailed(format!("malformed HELLO payload: {e}")))?;

        let negotiated = self
            .registry
            .negotiate(&self.local_codec_preference, &peer_caps.codecs);

        match negotiated {
            Some(_codec) => {
                let max_frame_bytes = self.local_max_frame_bytes.min(peer_caps.max_frame_bytes);
                let reply_caps = self.local_capabilities(max_frame_bytes);
                session.complete_handshake(peer_caps, _codec);

                let header = FrameHeader::reply_to(&frame.header, msg_type::CAPS, session.next_msg_id());
                let payload = serde_json::to_vec(&reply_caps)?;
                Ok(HandshakeOutcome::Established(Frame::new(header, payload)))
            }
            None => {
                tracing::warn!(
                    session_id = session.id,
                    "empty codec intersection during handshake"
                );
                Ok(HandshakeOutcome::Rejected(self.nack_frame(
                    session,
                    &frame.header,
                    ErrorCode::CodecUnsupported,
                )))
            }
        }
    }

    /// Handles a DATA frame once the session is `Established`.
    pub fn handle_data(&self, session: &mut Session, frame: &Frame) -> Result<Frame, ServerError> {
        session.record_request();
        let codec = match self.registry.get(frame.header.body_codec) {
            Some(codec) => codec,
            None => {
                tracing::warn!(
                    session_id = session.id,
                    codec_id = frame.header.body_codec,
                    "unsupported codec on DATA frame"
                );
                return Ok(self.nack_frame(session, &frame.header, ErrorCode::CodecUnsupported));
            }
        };

        let request_ether = match codec.decode(&frame.payload) {
            Ok(ether) => ether,
            Err(e) => {
                tracing::warn!(session_id = session.id, error = %e, "failed to decode DATA payload");
                let code = e.wire_code().unwrap_or(ErrorCode::SchemaUnknown);
                return Ok(self.nack_frame(session, &frame.header, code));
            }
        };

        let response_ether = match &self.on_ether {
            Some(callback) => callback(&request_ether),
            None => request_ether,
        };

        let payload = codec.encode(&response_ether)?;
        let header = FrameHeader::reply_to(&frame.header, msg_type::DATA, session.next_msg_id());
        Ok(Frame::new(header, payload))
    }

    /// Handles a PING frame, echoing its payload verbatim as PONG.
    pub fn handle_ping(&self, session: &mut Session, frame: &Frame) -> Result<Frame, ServerError> {
        let _ping: PingPong = serde_json::from_slice(&frame.payload)
            .map_err(|e| ServerError::Protocol(xcp_protocol::ProtocolError::Json(e)))?;
        let header = FrameHeader::reply_to(&frame.header, msg_type::PONG, session.next_msg_id());
        Ok(Frame::new(header, frame.payload.clone()))
    }

    /// Top-level dispatch for an `Established` session. HELLO is not
    /// expected here (handled once by the accept loop before dispatch
    /// begins); any other unknown `msg_type` yields a NACK.
    pub fn dispatch(&self, session: &mut Session, frame: &Frame) -> Result<Frame, ServerError> {
        match frame.header.msg_type {
            t if t == msg_type::DATA => self.handle_data(session, frame),
            t if t == msg_type::PING => self.handle_ping(session, frame),
            _ => Ok(self.nack_frame(session, &frame.header, ErrorCode::SchemaUnknown)),
        }
    }

    pub fn codec_id_default(&self) -> u16 {
        codec_id::JSON
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use xcp_protocol::{CodecRegistry, DEFAULT_MAX_FRAME_BYTES};

    fn test_session() -> Session {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 4000);
        Session::new(1, addr, DEFAULT_MAX_FRAME_BYTES)
    }

    fn hello_frame(caps: &Capabilities) -> Frame {
        let header = FrameHeader::new(msg_type::HELLO, codec_id::JSON, 1);
        Frame::new(header, serde_json::to_vec(caps).unwrap())
    }

    #[test]
    fn test_handshake_establishes_on_common_codec() {
        let handler = ConnectionHandler::new(Arc::new(CodecRegistry::with_defaults()), DEFAULT_MAX_FRAME_BYTES);
        let mut session = test_session();
        let caps = Capabilities {
            codecs: vec![codec_id::JSON, codec_id::BINARY],
            max_frame_bytes: 4096,
            shared_mem: false,
            accepts: vec![],
            emits: vec![],
        };
        let frame = hello_frame(&caps);
        match handler.handle_hello(&mut session, &frame).unwrap() {
            HandshakeOutcome::Established(reply) => {
                assert_eq!(reply.header.msg_type, msg_type::CAPS);
                assert_eq!(reply.header.in_reply_to, 1);
            }
            HandshakeOutcome::Rejected(_) => panic!("expected handshake to succeed"),
        }
        assert_eq!(session.max_frame_bytes(), 4096);
    }

    #[test]
    fn test_handshake_rejects_empty_intersection() {
        let handler = ConnectionHandler::new(Arc::new(CodecRegistry::with_defaults()), DEFAULT_MAX_FRAME_BYTES);
        let mut session = test_session();
        let caps = Capabilities {
            codecs: vec![codec_id::ARROW_IPC],
            max_frame_bytes: 4096,
            shared_mem: false,
            accepts: vec![],
            emits: vec![],
        };
        let frame = hello_frame(&caps);
        match handler.handle_hello(&mut session, &frame).unwrap() {
            HandshakeOutcome::Rejected(nack_frame) => {
                assert_eq!(nack_frame.header.msg_type, msg_type::NACK);
                let nack: Nack = serde_json::from_slice(&nack_frame.payload).unwrap();
                assert_eq!(nack.error_code, ErrorCode::CodecUnsupported.as_u16());
            }
            HandshakeOutcome::Established(_) => panic!("expected handshake to fail"),
        }
    }

    #[test]
    fn test_data_echoes_by_default() {
        let handler = ConnectionHandler::new(Arc::new(CodecRegistry::with_defaults()), DEFAULT_MAX_FRAME_BYTES);
        let mut session = test_session();
        session.complete_handshake(
            Capabilities {
                codecs: vec![codec_id::JSON],
                max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
                shared_mem: false,
                accepts: vec![],
                emits: vec![],
            },
            codec_id::JSON,
        );

        let ether = Ether::text("hello");
        let payload = serde_json::to_vec(&ether).unwrap();
        let header = FrameHeader::new(msg_type::DATA, codec_id::JSON, 2);
        let frame = Frame::new(header, payload);

        let reply = handler.handle_data(&mut session, &frame).unwrap();
        assert_eq!(reply.header.msg_type, msg_type::DATA);
        assert_eq!(reply.header.in_reply_to, 2);
        let decoded: Ether = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(decoded, ether);
    }

    #[test]
    fn test_data_unsupported_codec_yields_nack_and_session_stays_open() {
        let handler = ConnectionHandler::new(Arc::new(CodecRegistry::with_defaults()), DEFAULT_MAX_FRAME_BYTES);
        let mut session = test_session();
        let header = FrameHeader::new(msg_type::DATA, 0x00FE, 3);
        let frame = Frame::new(header, b"irrelevant".to_vec());

        let reply = handler.handle_data(&mut session, &frame).unwrap();
        assert_eq!(reply.header.msg_type, msg_type::NACK);
        let nack: Nack = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(nack.error_code, ErrorCode::CodecUnsupported.as_u16());
    }

    #[test]
    fn test_ping_echoes_nonce_as_pong() {
        let handler = ConnectionHandler::new(Arc::new(CodecRegistry::with_defaults()), DEFAULT_MAX_FRAME_BYTES);
        let mut session = test_session();
        let ping = PingPong { nonce: 424242 };
        let header = FrameHeader::new(msg_type::PING, codec_id::JSON, 4);
        let frame = Frame::new(header, serde_json::to_vec(&ping).unwrap());

        let reply = handler.handle_ping(&mut session, &frame).unwrap();
        assert_eq!(reply.header.msg_type, msg_type::PONG);
        assert_eq!(reply.header.in_reply_to, 4);
        let pong: PingPong = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(pong.nonce, 424242);
    }

    #[test]
    fn test_custom_ether_callback_transforms_response() {
        let handler = ConnectionHandler::new(Arc::new(CodecRegistry::with_defaults()), DEFAULT_MAX_FRAME_BYTES)
            .with_ether_callback(|_ether| Ether::text("transformed"));
        let mut session = test_session();
        let header = FrameHeader::new(msg_type::DATA, codec_id::JSON, 5);
        let frame = Frame::new(header, serde_json::to_vec(&Ether::text("original")).unwrap());

        let reply = handler.handle_data(&mut session, &frame).unwrap();
        let decoded: Ether = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(decoded, Ether::text("transformed"));
    }
}
