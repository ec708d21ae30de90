use crate::codec::Body;
use crate::error::MarqueeError;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A successful (2xx) response with its decoded body.
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) request_id: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Correlation id from the `x-dash-requestid` header.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Structured body; non-JSON/MessagePack bodies come back as `{"raw": text}`.
    pub fn into_value(self) -> Value {
        self.body.into_value()
    }

    /// Deserialize the whole body into `T`.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, MarqueeError> {
        Ok(serde_json::from_value(self.into_value())?)
    }

    /// Deserialize the body into `T` following the response shape. See [`Unpacked`].
    pub fn unpack<T: DeserializeOwned>(self) -> Result<Unpacked<T>, MarqueeError> {
        Unpacked::from_value(self.into_value())
    }
}

/// A body decoded into a caller-chosen model.
///
/// - a top-level array becomes [`Unpacked::Many`], with `null` entries kept as `None`
/// - an object with a `results` key becomes [`Unpacked::Paged`]: only `results` is
///   decoded, the remaining keys (`totalResults`, `scrollId`, ...) are left as JSON
/// - anything else becomes [`Unpacked::Single`]
#[derive(Debug, Clone, PartialEq)]
pub enum Unpacked<T> {
    Single(T),
    Many(Vec<Option<T>>),
    Paged {
        results: Vec<Option<T>>,
        rest: Map<String, Value>,
    },
}

impl<T: DeserializeOwned> Unpacked<T> {
    pub fn from_value(value: Value) -> Result<Self, MarqueeError> {
        match value {
            Value::Array(items) => Ok(Unpacked::Many(decode_items(items)?)),
            Value::Object(mut map) if map.contains_key("results") => {
                let results = match map.remove("results") {
                    Some(Value::Array(items)) => decode_items(items)?,
                    Some(Value::Null) | None => Vec::new(),
                    Some(single) => vec![Some(serde_json::from_value(single)?)],
                };
                Ok(Unpacked::Paged { results, rest: map })
            }
            other => Ok(Unpacked::Single(serde_json::from_value(other)?)),
        }
    }
}

fn decode_items<T: DeserializeOwned>(items: Vec<Value>) -> Result<Vec<Option<T>>, MarqueeError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Null => Ok(None),
            other => serde_json::from_value(other).map(Some).map_err(Into::into),
        })
        .collect()
}

impl<T> Unpacked<T> {
    /// Flatten to the decoded entries, dropping the envelope.
    pub fn into_vec(self) -> Vec<Option<T>> {
        match self {
            Unpacked::Single(item) => vec![Some(item)],
            Unpacked::Many(items) => items,
            Unpacked::Paged { results, .. } => results,
        }
    }

    pub fn into_single(self) -> Option<T> {
        match self {
            Unpacked::Single(item) => Some(item),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Asset {
        id: String,
        name: String,
    }

    #[test]
    fn arrays_keep_null_entries() {
        let unpacked: Unpacked<Asset> = Unpacked::from_value(json!([
            {"id": "A", "name": "first"},
            null,
            {"id": "C", "name": "third"}
        ]))
        .unwrap();
        let items = unpacked.into_vec();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().id, "A");
        assert!(items[1].is_none());
    }

    #[test]
    fn results_envelope_only_decodes_results() {
        let unpacked: Unpacked<Asset> = Unpacked::from_value(json!({
            "results": [{"id": "A", "name": "first"}],
            "totalResults": 1,
            "scrollId": "s1"
        }))
        .unwrap();
        match unpacked {
            Unpacked::Paged { results, rest } => {
                assert_eq!(results.len(), 1);
                assert_eq!(rest.get("totalResults"), Some(&json!(1)));
                assert_eq!(rest.get("scrollId"), Some(&json!("s1")));
                assert!(!rest.contains_key("results"));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn plain_object_is_single() {
        let unpacked: Unpacked<Asset> =
            Unpacked::from_value(json!({"id": "A", "name": "first"})).unwrap();
        assert_eq!(
            unpacked.into_single(),
            Some(Asset {
                id: "A".to_string(),
                name: "first".to_string()
            })
        );
    }

    #[test]
    fn mismatched_model_is_a_json_error() {
        let err = Unpacked::<Asset>::from_value(json!({"id": 1})).unwrap_err();
        assert!(matches!(err, MarqueeError::Json(_)));
    }
}
