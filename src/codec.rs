//! Payload encoding and response decoding.
//!
//! Requests default to JSON. When the negotiated content type is MessagePack, mappings,
//! typed models and frames are encoded with `rmp_serde` using named fields so the server
//! sees the same keys it would in JSON. Responses are decoded symmetrically from their
//! declared `Content-Type`; anything else is kept raw.

use crate::error::MarqueeError;
use crate::types::Frame;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const MSGPACK_CONTENT_TYPE: &str = "application/x-msgpack";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Json,
    MsgPack,
    Other(String),
}

impl ContentType {
    /// Parse a `Content-Type` header value, ignoring parameters such as `charset`.
    pub fn from_header(value: &str) -> Self {
        let essence = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => ContentType::Json,
            "application/x-msgpack" | "application/msgpack" => ContentType::MsgPack,
            _ => ContentType::Other(value.to_string()),
        }
    }

    pub fn header_value(&self) -> &str {
        match self {
            ContentType::Json => JSON_CONTENT_TYPE,
            ContentType::MsgPack => MSGPACK_CONTENT_TYPE,
            ContentType::Other(value) => value,
        }
    }
}

/// Outbound request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    /// A mapping, or a typed model already converted with [`Payload::model`].
    Value(Value),
    Bytes(Vec<u8>),
    Text(String),
    Frame(Frame),
}

impl Payload {
    /// Convert a typed model through its `Serialize` impl.
    ///
    /// Dates and enums take whatever representation their serde impls choose, so the
    /// JSON and MessagePack bodies agree.
    pub fn model<T: Serialize + ?Sized>(model: &T) -> Result<Self, MarqueeError> {
        Ok(Payload::Value(serde_json::to_value(model)?))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Empty => true,
            Payload::Value(Value::Null) => true,
            Payload::Value(Value::Object(map)) => map.is_empty(),
            Payload::Bytes(bytes) => bytes.is_empty(),
            Payload::Text(text) => text.is_empty(),
            Payload::Frame(_) | Payload::Value(_) => false,
        }
    }

    /// The mapping form, when the payload can go into a query string.
    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Value(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// Serialize into a request body for the given content type.
    ///
    /// Raw bytes and strings pass through untouched.
    pub fn encode(&self, content_type: &ContentType) -> Result<Option<Vec<u8>>, MarqueeError> {
        match self {
            Payload::Empty => Ok(None),
            Payload::Bytes(bytes) => Ok(Some(bytes.clone())),
            Payload::Text(text) => Ok(Some(text.as_bytes().to_vec())),
            Payload::Value(value) => encode_value(value, content_type).map(Some),
            Payload::Frame(frame) => match content_type {
                ContentType::MsgPack => Ok(Some(rmp_serde::to_vec_named(frame)?)),
                _ => Ok(Some(serde_json::to_vec(frame)?)),
            },
        }
    }
}

fn encode_value(value: &Value, content_type: &ContentType) -> Result<Vec<u8>, MarqueeError> {
    match content_type {
        ContentType::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
        _ => Ok(serde_json::to_vec(value)?),
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Empty,
            other => Payload::Value(other),
        }
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Value(Value::Object(map))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Frame> for Payload {
    fn from(frame: Frame) -> Self {
        Payload::Frame(frame)
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Empty
    }
}

impl<P: Into<Payload>> From<Option<P>> for Payload {
    fn from(value: Option<P>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Flatten a mapping into query pairs.
///
/// Arrays repeat the key once per element, `null` is dropped and nested objects are
/// sent as compact JSON.
pub fn query_pairs(map: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Value(Value),
    Raw { content_type: String, bytes: Bytes },
}

impl Body {
    /// Structured form of the body; raw payloads are wrapped as `{"raw": text}`.
    pub fn into_value(self) -> Value {
        match self {
            Body::Value(value) => value,
            Body::Raw { bytes, .. } => {
                let mut map = Map::new();
                map.insert(
                    "raw".to_string(),
                    Value::String(String::from_utf8_lossy(&bytes).into_owned()),
                );
                Value::Object(map)
            }
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Body::Value(value) => Some(value),
            Body::Raw { .. } => None,
        }
    }
}

/// Decode a successful response body per its declared content type.
///
/// An empty JSON or MessagePack body decodes to an empty object.
pub fn decode_body(content_type: Option<&str>, bytes: Bytes) -> Result<Body, MarqueeError> {
    let declared = content_type.map(ContentType::from_header);
    match declared {
        Some(ContentType::Json) => {
            if bytes.is_empty() {
                return Ok(Body::Value(Value::Object(Map::new())));
            }
            Ok(Body::Value(serde_json::from_slice(&bytes)?))
        }
        Some(ContentType::MsgPack) => {
            if bytes.is_empty() {
                return Ok(Body::Value(Value::Object(Map::new())));
            }
            Ok(Body::Value(rmp_serde::from_slice(&bytes)?))
        }
        Some(ContentType::Other(content_type)) => Ok(Body::Raw {
            content_type,
            bytes,
        }),
        None => Ok(Body::Raw {
            content_type: String::new(),
            bytes,
        }),
    }
}

/// Decode a MessagePack buffer straight into a typed value.
pub fn from_msgpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MarqueeError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
