//! `Ether`: the self-describing application payload carried inside DATA
//! frames.

use crate::value::{Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered, optional binary side-channel attached to an `Ether`.
///
/// At most one of `uri` and `inline_bytes` should be set; if both are
/// absent the attachment is a descriptor only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_bytes: Option<Vec<u8>>,
}

impl Attachment {
    pub fn descriptor(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: None,
            media_type: None,
            codec: None,
            shape: None,
            dtype: None,
            size_bytes: None,
            inline_bytes: None,
        }
    }
}

/// Self-describing application-level envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ether {
    pub kind: String,
    pub schema_version: u32,
    #[serde(default)]
    pub payload: ValueMap,
    #[serde(default)]
    pub metadata: ValueMap,
    #[serde(default)]
    pub extra_fields: ValueMap,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Ether {
    pub fn new(kind: impl Into<String>, schema_version: u32) -> Self {
        Self {
            kind: kind.into(),
            schema_version,
            payload: ValueMap::new(),
            metadata: ValueMap::new(),
            extra_fields: ValueMap::new(),
            attachments: Vec::new(),
        }
    }

    /// `kind: "text"`, `payload: {text}`.
    pub fn text(text: impl Into<String>) -> Self {
        let mut ether = Self::new("text", 1);
        ether.payload.insert("text".into(), Value::String(text.into()));
        ether
    }

    /// `kind: "embedding"`, `payload: {values, dim}`.
    pub fn embedding(values: Vec<f64>, dim: i64) -> Self {
        let mut ether = Self::new("embedding", 1);
        ether.payload.insert(
            "values".into(),
            Value::List(values.into_iter().map(Value::Float).collect()),
        );
        ether.payload.insert("dim".into(), Value::Int(dim));
        ether
    }

    /// `kind: "tokens"`, `payload: {token_ids, mask?}`.
    pub fn tokens(token_ids: Vec<i64>, mask: Option<Vec<i64>>) -> Self {
        let mut ether = Self::new("tokens", 1);
        ether.payload.insert(
            "token_ids".into(),
            Value::List(token_ids.into_iter().map(Value::Int).collect()),
        );
        if let Some(mask) = mask {
            ether.payload.insert(
                "mask".into(),
                Value::List(mask.into_iter().map(Value::Int).collect()),
            );
        }
        ether
    }

    /// `kind: "image"`, `payload: {height, width, channels, data}`.
    pub fn image(height: i64, width: i64, channels: i64, data: Vec<u8>) -> Self {
        let mut ether = Self::new("image", 1);
        ether.payload.insert("height".into(), Value::Int(height));
        ether.payload.insert("width".into(), Value::Int(width));
        ether.payload.insert("channels".into(), Value::Int(channels));
        ether.payload.insert("data".into(), Value::Bytes(data));
        ether
    }

    /// Inserts an ISO-8601 timestamp into `metadata` under `key`, matching
    /// the JSON codec's datetime normalization on encode.
    pub fn with_metadata_datetime(mut self, key: impl Into<String>, when: DateTime<Utc>) -> Self {
        self.metadata
            .insert(key.into(), Value::String(when.to_rfc3339()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_constructor() {
        let ether = Ether::text("Hello");
        assert_eq!(ether.kind, "text");
        assert_eq!(ether.schema_version, 1);
        assert_eq!(ether.payload.get("text").unwrap().as_str(), Some("Hello"));
    }

    #[test]
    fn test_embedding_constructor() {
        let ether = Ether::embedding(vec![1.0, 2.0, 3.0], 3);
        assert_eq!(ether.kind, "embedding");
        match ether.payload.get("values").unwrap() {
            Value::List(v) => assert_eq!(v.len(), 3),
            _ => panic!("expected list"),
        }
        assert_eq!(ether.payload.get("dim").unwrap().as_int(), Some(3));
    }

    #[test]
    fn test_tokens_constructor_without_mask() {
        let ether = Ether::tokens(vec![1, 2, 3], None);
        assert!(!ether.payload.contains_key("mask"));
        assert!(ether.payload.contains_key("token_ids"));
    }

    #[test]
    fn test_tokens_constructor_with_mask() {
        let ether = Ether::tokens(vec![1, 2], Some(vec![1, 0]));
        assert!(ether.payload.contains_key("mask"));
    }

    #[test]
    fn test_image_constructor() {
        let ether = Ether::image(2, 2, 3, vec![0u8; 12]);
        assert_eq!(ether.payload.get("height").unwrap().as_int(), Some(2));
        match ether.payload.get("data").unwrap() {
            Value::Bytes(b) => assert_eq!(b.len(), 12),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn test_ether_json_roundtrip() {
        let ether = Ether::text("round trip me");
        let json = serde_json::to_string(&ether).unwrap();
        let decoded: Ether = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ether);
    }

    #[test]
    fn test_unknown_fields_preserved_in_extra_fields() {
        let json = r#"{"kind":"text","schema_version":1,"payload":{"text":"hi"},
            "extra_fields":{"future_flag":true}}"#;
        let decoded: Ether = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.extra_fields.get("future_flag").unwrap(), &Value::Bool(true));
    }

    #[test]
    fn test_attachment_descriptor_only() {
        let att = Attachment::descriptor("att-1");
        assert!(att.uri.is_none());
        assert!(att.inline_bytes.is_none());
    }
}
