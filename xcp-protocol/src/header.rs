//! `FrameHeader`: the JSON-serialized, self-describing part of a frame.
//!
//! The header is eagerly parsed into this owned struct at decode time
//! rather than kept as a borrowed view into the decode buffer — the raw
//! `header_bytes` slice only lives for the duration of a single `decode`
//! call.

use serde::{Deserialize, Serialize};

/// A single free-form key/value tag attached to a frame header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub val: String,
}

/// Structured, versioned schema identifier embedded in a frame header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaKey {
    #[serde(rename = "nsHash")]
    pub ns_hash: u32,
    #[serde(rename = "kindId")]
    pub kind_id: u32,
    pub major: u16,
    pub minor: u16,
    #[serde(with = "hex128")]
    pub hash128: [u8; 16],
}

impl Default for SchemaKey {
    fn default() -> Self {
        Self {
            ns_hash: 0,
            kind_id: 0,
            major: 0,
            minor: 0,
            hash128: [0u8; 16],
        }
    }
}

mod hex128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = String::with_capacity(32);
        for b in bytes {
            s.push_str(&format!("{b:02x}"));
        }
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 16], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.len() != 32 {
            return Err(serde::de::Error::custom(format!(
                "hash128 must be 32 hex chars, got {}",
                s.len()
            )));
        }
        let mut out = [0u8; 16];
        for (i, chunk) in out.iter_mut().enumerate() {
            let byte_str = &s[i * 2..i * 2 + 2];
            *chunk = u8::from_str_radix(byte_str, 16).map_err(serde::de::Error::custom)?;
        }
        Ok(out)
    }
}

/// Logical, typed view of a frame's JSON header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    #[serde(rename = "channelId")]
    pub channel_id: u32,
    #[serde(rename = "msgType")]
    pub msg_type: u16,
    #[serde(rename = "bodyCodec")]
    pub body_codec: u16,
    #[serde(rename = "schemaKey")]
    pub schema_key: SchemaKey,
    #[serde(rename = "msgId")]
    pub msg_id: u64,
    #[serde(rename = "inReplyTo")]
    pub in_reply_to: u64,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl FrameHeader {
    /// Builds a header for a new, not-yet-sent frame on channel 0 with no
    /// tags and no `in_reply_to` correlation.
    pub fn new(msg_type: u16, body_codec: u16, msg_id: u64) -> Self {
        Self {
            channel_id: 0,
            msg_type,
            body_codec,
            schema_key: SchemaKey::default(),
            msg_id,
            in_reply_to: 0,
            tags: Vec::new(),
        }
    }

    /// Builds a reply header that echoes `channel_id` and `body_codec` of
    /// the request and correlates via `in_reply_to`, per the default
    /// handler's echo-path rules (§4.4).
    pub fn reply_to(request: &FrameHeader, msg_type: u16, msg_id: u64) -> Self {
        Self {
            channel_id: request.channel_id,
            msg_type,
            body_codec: request.body_codec,
            schema_key: SchemaKey::default(),
            msg_id,
            in_reply_to: request.msg_id,
            tags: Vec::new(),
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_json_field_names() {
        let header = FrameHeader::new(0x0003, 0x0001, 1);
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"channelId\""));
        assert!(json.contains("\"msgType\""));
        assert!(json.contains("\"bodyCodec\""));
        assert!(json.contains("\"schemaKey\""));
        assert!(json.contains("\"msgId\""));
        assert!(json.contains("\"inReplyTo\""));
        assert!(json.contains("\"nsHash\""));
        assert!(json.contains("\"kindId\""));
        assert!(json.contains("\"hash128\""));
    }

    #[test]
    fn test_header_roundtrip() {
        let mut header = FrameHeader::new(0x0003, 0x0001, 42);
        header.tags.push(Tag {
            key: "trace".into(),
            val: "abc123".into(),
        });
        let bytes = header.to_json_bytes().unwrap();
        let decoded = FrameHeader::from_json_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_reply_to_echoes_channel_and_codec() {
        let mut request = FrameHeader::new(0x0003, 0x0008, 5);
        request.channel_id = 7;
        let reply = FrameHeader::reply_to(&request, 0x0003, 6);
        assert_eq!(reply.channel_id, 7);
        assert_eq!(reply.body_codec, 0x0008);
        assert_eq!(reply.in_reply_to, 5);
        assert_eq!(reply.msg_id, 6);
    }

    #[test]
    fn test_hash128_hex_roundtrip() {
        let mut key = SchemaKey::default();
        key.hash128 = [0xAB; 16];
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains(&"ab".repeat(16)));
        let decoded: SchemaKey = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.hash128, [0xAB; 16]);
    }

    #[test]
    fn test_hash128_rejects_bad_length() {
        let bad = "\"deadbeef\"";
        let result: Result<SchemaKey, _> = serde_json::from_str(&format!(
            "{{\"nsHash\":0,\"kindId\":0,\"major\":0,\"minor\":0,\"hash128\":{bad}}}"
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_tags_default_to_empty_when_absent() {
        let zero_hash = "0".repeat(32);
        let json = format!(
            "{{\"channelId\":0,\"msgType\":1,\"bodyCodec\":1,\
            \"schemaKey\":{{\"nsHash\":0,\"kindId\":0,\"major\":0,\"minor\":0,\"hash128\":\"{zero_hash}\"}},\
            \"msgId\":1,\"inReplyTo\":0}}"
        );
        let decoded: FrameHeader = serde_json::from_str(&json).unwrap();
        assert!(decoded.tags.is_empty());
    }
}
