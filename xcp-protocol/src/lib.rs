//! # xcp-protocol
//!
//! Wire protocol implementation for XCP (eXtensible Coordination Protocol).
//!
//! This crate provides:
//! - Binary framing with a JSON header, 4/8-byte length prefix, and CRC32C
//!   trailer
//! - The self-describing `Ether` application envelope and its dynamically
//!   typed value model
//! - Pluggable payload codecs (JSON, binary TLV) behind a registry keyed by
//!   wire codec id
//! - Control message shapes (HELLO/CAPS, PING/PONG, NACK) and error codes

pub mod codec;
pub mod control;
pub mod error;
pub mod ether;
pub mod frame;
pub mod header;
pub mod value;

pub use codec::{BinaryCodec, Codec, CodecRegistry, JsonCodec, JsonFallback};
pub use control::{codec_id, msg_type, Capabilities, Nack, PingPong};
pub use error::{ErrorCode, ProtocolError};
pub use ether::{Attachment, Ether};
pub use frame::{flags as frame_flags, Frame, MAGIC, VERSION_BYTE};
pub use header::{FrameHeader, SchemaKey, Tag};
pub use value::{Value, ValueMap};

/// Default listening port for an XCP server.
pub const DEFAULT_PORT: u16 = 7220;

/// Default maximum frame size for a connection before negotiation: 1 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: u64 = 1024 * 1024;

/// Suggested cap for WAN-facing deployments: 512 KiB.
pub const WAN_MAX_FRAME_BYTES: u64 = 512 * 1024;

/// Suggested cap for trusted LAN/same-host deployments: 4 MiB.
pub const LAN_MAX_FRAME_BYTES: u64 = 4 * 1024 * 1024;

/// Threshold, in bytes, above which the client's codec-overuse heuristic
/// considers a JSON-encoded message "large" (see `xcp-client`'s
/// `check_json_overuse`).
pub const JSON_OVERUSE_THRESHOLD_BYTES: u64 = 2048;
