//! Per-connection session state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use xcp_protocol::Capabilities;

/// Connection lifecycle phase, driven by the HELLO/CAPS handshake and
/// connection teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Waiting for the peer's HELLO.
    Opening,
    /// Handshake complete; DATA/PING frames are served normally.
    Established,
    /// Graceful shutdown in progress; no new requests are accepted.
    Closing,
    /// Connection torn down.
    Closed,
}

/// State tracked for one accepted connection, from HELLO through close.
pub struct Session {
    pub id: u64,
    pub remote_addr: SocketAddr,
    phase: ConnectionPhase,
    peer_caps: Option<Capabilities>,
    /// Codec ids this session will accept on DATA frames, the result of
    /// negotiation during the handshake (a single codec id, once chosen).
    negotiated_codec: Option<u16>,
    max_frame_bytes: u64,
    next_msg_id: AtomicU64,
    request_count: AtomicU64,
    created_at: Instant,
    last_activity: std::sync::Mutex<Instant>,
}

impl Session {
    pub fn new(id: u64, remote_addr: SocketAddr, max_frame_bytes: u64) -> Self {
        Self {
            id,
            remote_addr,
            phase: ConnectionPhase::Opening,
            peer_caps: None,
            negotiated_codec: None,
            max_frame_bytes,
            next_msg_id: AtomicU64::new(1),
            request_count: AtomicU64::new(0),
            created_at: Instant::now(),
            last_activity: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
    }

    pub fn peer_caps(&self) -> Option<&Capabilities> {
        self.peer_caps.as_ref()
    }

    pub fn negotiated_codec(&self) -> Option<u16> {
        self.negotiated_codec
    }

    /// Records the result of a successful handshake: the peer's advertised
    /// capabilities, the codec this side chose, and the effective frame-size
    /// ceiling (the smaller of the two sides' limits).
    pub fn complete_handshake(&mut self, peer_caps: Capabilities, negotiated_codec: u16) {
        self.max_frame_bytes = self.max_frame_bytes.min(peer_caps.max_frame_bytes);
        self.peer_caps = Some(peer_caps);
        self.negotiated_codec = Some(negotiated_codec);
        self.phase = ConnectionPhase::Established;
    }

    pub fn max_frame_bytes(&self) -> u64 {
        self.max_frame_bytes
    }

    /// Next `msg_id` for a frame this side originates (replies echo the
    /// request's id via `in_reply_to`, not this counter).
    pub fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}
