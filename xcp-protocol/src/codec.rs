//! Pluggable payload codecs and the registry that dispatches on
//! `FrameHeader::body_codec`.
//!
//! Two codecs are mandatory on every peer: [`JsonCodec`] (`0x0001`) and
//! [`BinaryCodec`] (`0x0008`). Anything else (tensor/Arrow/DLPack codecs) is
//! negotiated during HELLO/CAPS and is out of scope for this crate — a peer
//! that advertises one of those ids must register its own [`Codec`] impl
//! with the registry before serving traffic.

use crate::control::codec_id;
use crate::error::ProtocolError;
use crate::ether::{Attachment, Ether};
use crate::value::{Value, ValueMap};
use std::collections::HashMap;

/// A payload transcoder keyed by a single `body_codec` id.
pub trait Codec: Send + Sync {
    fn codec_id(&self) -> u16;
    fn encode(&self, ether: &Ether) -> Result<Vec<u8>, ProtocolError>;
    fn decode(&self, bytes: &[u8]) -> Result<Ether, ProtocolError>;
}

/// Canonical compact JSON encoding. Datetime-valued metadata fields are
/// expected to already be ISO-8601 strings (see `Ether::with_metadata_datetime`);
/// this codec does not itself walk the tree looking for them.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn codec_id(&self) -> u16 {
        codec_id::JSON
    }

    fn encode(&self, ether: &Ether) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(ether)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Ether, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Governs whether [`BinaryCodec`] falls back to JSON for value shapes its
/// TLV encoding can't represent losslessly (currently: none — this exists so
/// a future codec extension has somewhere to plug in without a silent,
/// undocumented fallback path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonFallback {
    Disabled,
    Enabled,
}

/// Deterministic tag-length-value encoding of an `Ether`. Smaller and faster
/// to encode/decode than JSON for payloads dominated by numeric lists
/// (embeddings, token ids, raw image bytes).
#[derive(Debug, Clone, Copy)]
pub struct BinaryCodec {
    fallback: JsonFallback,
}

impl BinaryCodec {
    pub fn new(fallback: JsonFallback) -> Self {
        Self { fallback }
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new(JsonFallback::Disabled)
    }
}

// Value tags for the TLV encoding. Distinct from the wire `codec_id`s.
mod tag {
    pub const NULL: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const INT: u8 = 0x02;
    pub const FLOAT: u8 = 0x03;
    pub const STRING: u8 = 0x04;
    pub const BYTES: u8 = 0x05;
    pub const LIST: u8 = 0x06;
    pub const MAP: u8 = 0x07;
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

fn read_len(bytes: &[u8], pos: &mut usize) -> Result<usize, ProtocolError> {
    let slice = bytes
        .get(*pos..*pos + 4)
        .ok_or_else(|| ProtocolError::HeaderMalformed("truncated length field".into()))?;
    *pos += 4;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()) as usize)
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(tag::NULL),
        Value::Bool(b) => {
            out.push(tag::BOOL);
            out.push(*b as u8);
        }
        Value::Int(i) => {
            out.push(tag::INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(tag::FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::String(s) => {
            out.push(tag::STRING);
            write_len(out, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(bytes) => {
            out.push(tag::BYTES);
            write_len(out, bytes.len());
            out.extend_from_slice(bytes);
        }
        Value::List(items) => {
            out.push(tag::LIST);
            write_len(out, items.len());
            for item in items {
                write_value(out, item);
            }
        }
        Value::Map(entries) => {
            out.push(tag::MAP);
            write_len(out, entries.len());
            for (k, v) in entries {
                write_len(out, k.len());
                out.extend_from_slice(k.as_bytes());
                write_value(out, v);
            }
        }
    }
}

fn read_value(bytes: &[u8], pos: &mut usize) -> Result<Value, ProtocolError> {
    let t = *bytes
        .get(*pos)
        .ok_or_else(|| ProtocolError::HeaderMalformed("truncated value tag".into()))?;
    *pos += 1;
    Ok(match t {
        tag::NULL => Value::Null,
        tag::BOOL => {
            let b = *bytes
                .get(*pos)
                .ok_or_else(|| ProtocolError::HeaderMalformed("truncated bool".into()))?;
            *pos += 1;
            Value::Bool(b != 0)
        }
        tag::INT => {
            let slice = bytes
                .get(*pos..*pos + 8)
                .ok_or_else(|| ProtocolError::HeaderMalformed("truncated int".into()))?;
            *pos += 8;
            Value::Int(i64::from_le_bytes(slice.try_into().unwrap()))
        }
        tag::FLOAT => {
            let slice = bytes
                .get(*pos..*pos + 8)
                .ok_or_else(|| ProtocolError::HeaderMalformed("truncated float".into()))?;
            *pos += 8;
            Value::Float(f64::from_le_bytes(slice.try_into().unwrap()))
        }
        tag::STRING => {
            let len = read_len(bytes, pos)?;
            let slice = bytes
                .get(*pos..*pos + len)
                .ok_or_else(|| ProtocolError::HeaderMalformed("truncated string".into()))?;
            *pos += len;
            Value::String(
                std::str::from_utf8(slice)
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string(),
            )
        }
        tag::BYTES => {
            let len = read_len(bytes, pos)?;
            let slice = bytes
                .get(*pos..*pos + len)
                .ok_or_else(|| ProtocolError::HeaderMalformed("truncated bytes".into()))?;
            *pos += len;
            Value::Bytes(slice.to_vec())
        }
        tag::LIST => {
            let len = read_len(bytes, pos)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(read_value(bytes, pos)?);
            }
            Value::List(items)
        }
        tag::MAP => {
            let len = read_len(bytes, pos)?;
            let mut entries = HashMap::with_capacity(len);
            for _ in 0..len {
                let klen = read_len(bytes, pos)?;
                let kslice = bytes
                    .get(*pos..*pos + klen)
                    .ok_or_else(|| ProtocolError::HeaderMalformed("truncated map key".into()))?;
                *pos += klen;
                let key = std::str::from_utf8(kslice)
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string();
                let val = read_value(bytes, pos)?;
                entries.insert(key, val);
            }
            Value::Map(entries)
        }
        other => {
            return Err(ProtocolError::HeaderMalformed(format!(
                "unknown binary codec tag: {other:#04x}"
            )))
        }
    })
}

fn write_value_map(out: &mut Vec<u8>, map: &ValueMap) {
    write_value(out, &Value::Map(map.clone()));
}

fn read_value_map(bytes: &[u8], pos: &mut usize) -> Result<ValueMap, ProtocolError> {
    match read_value(bytes, pos)? {
        Value::Map(m) => Ok(m),
        _ => Err(ProtocolError::HeaderMalformed(
            "expected map at this position".into(),
        )),
    }
}

fn write_attachment(out: &mut Vec<u8>, att: &Attachment) {
    let mut fields = ValueMap::new();
    fields.insert("id".into(), Value::String(att.id.clone()));
    if let Some(uri) = &att.uri {
        fields.insert("uri".into(), Value::String(uri.clone()));
    }
    if let Some(media_type) = &att.media_type {
        fields.insert("media_type".into(), Value::String(media_type.clone()));
    }
    if let Some(codec) = att.codec {
        fields.insert("codec".into(), Value::Int(codec as i64));
    }
    if let Some(shape) = &att.shape {
        fields.insert(
            "shape".into(),
            Value::List(shape.iter().map(|d| Value::Int(*d)).collect()),
        );
    }
    if let Some(dtype) = &att.dtype {
        fields.insert("dtype".into(), Value::String(dtype.clone()));
    }
    if let Some(size_bytes) = att.size_bytes {
        fields.insert("size_bytes".into(), Value::Int(size_bytes as i64));
    }
    if let Some(inline_bytes) = &att.inline_bytes {
        fields.insert("inline_bytes".into(), Value::Bytes(inline_bytes.clone()));
    }
    write_value_map(out, &fields);
}

fn read_attachment(bytes: &[u8], pos: &mut usize) -> Result<Attachment, ProtocolError> {
    let fields = read_value_map(bytes, pos)?;
    let id = fields
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::HeaderMalformed("attachment missing id".into()))?
        .to_string();
    Ok(Attachment {
        id,
        uri: fields.get("uri").and_then(Value::as_str).map(str::to_string),
        media_type: fields
            .get("media_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        codec: fields.get("codec").and_then(Value::as_int).map(|i| i as u16),
        shape: fields.get("shape").and_then(|v| match v {
            Value::List(items) => Some(items.iter().filter_map(Value::as_int).collect()),
            _ => None,
        }),
        dtype: fields.get("dtype").and_then(Value::as_str).map(str::to_string),
        size_bytes: fields.get("size_bytes").and_then(Value::as_int).map(|i| i as u64),
        inline_bytes: fields.get("inline_bytes").and_then(|v| match v {
            Value::Bytes(b) => Some(b.clone()),
            _ => None,
        }),
    })
}

impl Codec for BinaryCodec {
    fn codec_id(&self) -> u16 {
        codec_id::BINARY
    }

    fn encode(&self, ether: &Ether) -> Result<Vec<u8>, ProtocolError> {
        let _ = self.fallback;
        let mut out = Vec::new();
        write_value(&mut out, &Value::String(ether.kind.clone()));
        out.extend_from_slice(&ether.schema_version.to_le_bytes());
        write_value_map(&mut out, &ether.payload);
        write_value_map(&mut out, &ether.metadata);
        write_value_map(&mut out, &ether.extra_fields);
        write_len(&mut out, ether.attachments.len());
        for att in &ether.attachments {
            write_attachment(&mut out, att);
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Ether, ProtocolError> {
        let mut pos = 0usize;
        let kind = match read_value(bytes, &mut pos)? {
            Value::String(s) => s,
            _ => return Err(ProtocolError::HeaderMalformed("expected kind string".into())),
        };
        let version_slice = bytes
            .get(pos..pos + 4)
            .ok_or_else(|| ProtocolError::HeaderMalformed("truncated schema_version".into()))?;
        pos += 4;
        let schema_version = u32::from_le_bytes(version_slice.try_into().unwrap());
        let payload = read_value_map(bytes, &mut pos)?;
        let metadata = read_value_map(bytes, &mut pos)?;
        let extra_fields = read_value_map(bytes, &mut pos)?;
        let attachment_count = read_len(bytes, &mut pos)?;
        let mut attachments = Vec::with_capacity(attachment_count);
        for _ in 0..attachment_count {
            attachments.push(read_attachment(bytes, &mut pos)?);
        }
        Ok(Ether {
            kind,
            schema_version,
            payload,
            metadata,
            extra_fields,
            attachments,
        })
    }
}

/// Dispatch table from wire `codec_id` to a boxed [`Codec`]. Built once at
/// startup and shared read-only across connections.
pub struct CodecRegistry {
    codecs: HashMap<u16, Box<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// The registry every server and client starts from: JSON and binary,
    /// both mandatory.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(JsonCodec));
        registry.register(Box::new(BinaryCodec::default()));
        registry
    }

    pub fn register(&mut self, codec: Box<dyn Codec>) {
        self.codecs.insert(codec.codec_id(), codec);
    }

    pub fn get(&self, codec_id: u16) -> Option<&dyn Codec> {
        self.codecs.get(&codec_id).map(|c| c.as_ref())
    }

    pub fn supports(&self, codec_id: u16) -> bool {
        self.codecs.contains_key(&codec_id)
    }

    /// Ordered by this side's own preference — the first entry this
    /// registry supports wins, never an unordered-set intersection.
    pub fn negotiate<'a>(&self, local_preference: &'a [u16], peer_codecs: &[u16]) -> Option<u16> {
        local_preference
            .iter()
            .find(|id| self.codecs.contains_key(id) && peer_codecs.contains(id))
            .copied()
    }

    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.codecs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ether() -> Ether {
        let mut ether = Ether::text("hello world");
        ether
            .metadata
            .insert("source".into(), Value::String("unit-test".into()));
        ether.attachments.push(Attachment {
            id: "att-1".into(),
            uri: None,
            media_type: Some("application/octet-stream".into()),
            codec: Some(codec_id::BINARY),
            shape: Some(vec![2, 3]),
            dtype: Some("f32".into()),
            size_bytes: Some(24),
            inline_bytes: Some(vec![1, 2, 3, 4]),
        });
        ether
    }

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec;
        let ether = sample_ether();
        let bytes = codec.encode(&ether).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, ether);
    }

    #[test]
    fn test_binary_codec_roundtrip() {
        let codec = BinaryCodec::default();
        let ether = sample_ether();
        let bytes = codec.encode(&ether).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, ether);
    }

    #[test]
    fn test_binary_codec_smaller_than_json_for_numeric_payload() {
        let ether = Ether::embedding(vec![1.0; 256], 256);
        let json_len = JsonCodec.encode(&ether).unwrap().len();
        let binary_len = BinaryCodec::default().encode(&ether).unwrap().len();
        assert!(binary_len < json_len);
    }

    #[test]
    fn test_registry_defaults_include_json_and_binary() {
        let registry = CodecRegistry::with_defaults();
        assert!(registry.supports(codec_id::JSON));
        assert!(registry.supports(codec_id::BINARY));
        assert!(!registry.supports(codec_id::ARROW_IPC));
    }

    #[test]
    fn test_negotiate_prefers_local_order() {
        let registry = CodecRegistry::with_defaults();
        let local_pref = [codec_id::BINARY, codec_id::JSON];
        let peer = vec![codec_id::JSON, codec_id::BINARY];
        assert_eq!(
            registry.negotiate(&local_pref, &peer),
            Some(codec_id::BINARY)
        );
    }

    #[test]
    fn test_negotiate_returns_none_on_empty_intersection() {
        let registry = CodecRegistry::with_defaults();
        let local_pref = [codec_id::JSON, codec_id::BINARY];
        let peer = vec![codec_id::ARROW_IPC];
        assert_eq!(registry.negotiate(&local_pref, &peer), None);
    }
}
