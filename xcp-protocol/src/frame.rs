//! Frame codec: fixed 8-byte prefix + JSON header + u32/u64-prefixed
//! payload + CRC32C trailer, all little-endian outside the header JSON.

use crate::error::ProtocolError;
use crate::header::FrameHeader;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed magic constant at the start of every frame.
pub const MAGIC: u32 = 0xA9A1_7A10;

/// `(major << 4) | minor` for the only version this core speaks.
pub const VERSION_BYTE: u8 = 0x02;

/// Frame flag bits. Only `LARGE` is behaviorally active; the rest are
/// reserved and must be zero on send, rejected on receive.
pub mod flags {
    pub const COMP: u8 = 0b1000_0000;
    pub const CRYPT: u8 = 0b0100_0000;
    pub const MORE: u8 = 0b0010_0000;
    pub const LARGE: u8 = 0b0001_0000;
    pub const VALID_MASK: u8 = LARGE;
}

/// `magic(4) + version(1) + flags(1) + header_len(2)`.
const PREFIX_LEN: usize = 8;
const CRC_LEN: usize = 4;
const LARGE_THRESHOLD: u64 = 1 << 32;

/// A decoded (or about-to-be-encoded) XCP frame: a typed header plus an
/// opaque payload. The payload is decoded into an `Ether` or control record
/// by the codec named in `header.body_codec`, not by this type.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Serializes this frame to wire bytes, choosing the 4- or 8-byte
    /// payload length field based on the payload's size and setting `LARGE`
    /// accordingly.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let header_bytes = self.header.to_json_bytes()?;
        if header_bytes.is_empty() {
            return Err(ProtocolError::HeaderMalformed(
                "header_len must be at least 1".into(),
            ));
        }
        if header_bytes.len() > u16::MAX as usize {
            return Err(ProtocolError::HeaderMalformed(format!(
                "header_bytes too large: {} bytes",
                header_bytes.len()
            )));
        }

        let payload_len = self.payload.len() as u64;
        let large = payload_len >= LARGE_THRESHOLD;
        let frame_flags = if large { flags::LARGE } else { 0 };
        let plen_width = if large { 8 } else { 4 };

        let mut buf = BytesMut::with_capacity(
            PREFIX_LEN + header_bytes.len() + plen_width + self.payload.len() + CRC_LEN,
        );
        buf.put_u32_le(MAGIC);
        buf.put_u8(VERSION_BYTE);
        buf.put_u8(frame_flags);
        buf.put_u16_le(header_bytes.len() as u16);
        buf.put_slice(&header_bytes);
        if large {
            buf.put_u64_le(payload_len);
        } else {
            buf.put_u32_le(payload_len as u32);
        }
        buf.put_slice(&self.payload);
        buf.put_u32_le(crc32c::crc32c(&self.payload));
        Ok(buf)
    }

    /// Attempts to decode a single frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame —
    /// the caller should read more bytes from the socket and retry. Any
    /// `Err` returned here is connection-fatal; the caller must stop
    /// reading and close the connection rather than retry.
    pub fn decode(buf: &mut BytesMut, max_frame_bytes: u64) -> Result<Option<Frame>, ProtocolError> {
        if buf.len() < PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = &buf[..PREFIX_LEN];
        let magic = prefix.get_u32_le();
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic {
                expected: MAGIC,
                actual: magic,
            });
        }
        let version = prefix.get_u8();
        if version != VERSION_BYTE {
            return Err(ProtocolError::BadVersion(version));
        }
        let frame_flags = prefix.get_u8();
        if frame_flags & !flags::VALID_MASK != 0 {
            return Err(ProtocolError::HeaderMalformed(format!(
                "reserved or unsupported flag bits set: {frame_flags:#04x}"
            )));
        }
        let header_len = prefix.get_u16_le() as usize;
        if header_len == 0 {
            return Err(ProtocolError::HeaderMalformed(
                "header_len must be at least 1".into(),
            ));
        }
        if header_len as u64 > max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size: header_len as u64,
                max: max_frame_bytes,
            });
        }

        let large = frame_flags & flags::LARGE != 0;
        let plen_width = if large { 8 } else { 4 };
        let prefix_and_header_and_plen = PREFIX_LEN + header_len + plen_width;
        if buf.len() < prefix_and_header_and_plen {
            return Ok(None);
        }

        let header_bytes = &buf[PREFIX_LEN..PREFIX_LEN + header_len];
        let header = FrameHeader::from_json_bytes(header_bytes)
            .map_err(|e| ProtocolError::HeaderMalformed(e.to_string()))?;

        let mut plen_slice = &buf[PREFIX_LEN + header_len..prefix_and_header_and_plen];
        let payload_len: u64 = if large {
            plen_slice.get_u64_le()
        } else {
            plen_slice.get_u32_le() as u64
        };
        if large && payload_len < LARGE_THRESHOLD {
            return Err(ProtocolError::HeaderMalformed(
                "LARGE flag set but payload_len < 2^32".into(),
            ));
        }
        if payload_len > max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: max_frame_bytes,
            });
        }

        let total_len = prefix_and_header_and_plen + payload_len as usize + CRC_LEN;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(prefix_and_header_and_plen);
        let payload = buf.split_to(payload_len as usize).freeze();
        let expected_crc = (&buf[..CRC_LEN]).get_u32_le();
        buf.advance(CRC_LEN);

        let actual_crc = crc32c::crc32c(&payload);
        if actual_crc != expected_crc {
            return Err(ProtocolError::BadCrc {
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        Ok(Some(Frame { header, payload }))
    }
}
