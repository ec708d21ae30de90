use crate::codec::{ContentType, Payload, query_pairs};
use crate::error::MarqueeError;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// One outbound call.
///
/// ```
/// use marquee_client::{Payload, Request};
/// use serde_json::json;
///
/// let request = Request::get("/assets")
///     .payload(Payload::from(json!({"ticker": "SPX", "limit": 10})))
///     .include_version(true);
/// assert_eq!(request.path(), "/assets");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) payload: Payload,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) include_version: bool,
    pub(crate) use_body: bool,
    pub(crate) try_auth: bool,
}

/// Query pairs and body bytes, ready to hand to the transport.
#[derive(Debug, Default)]
pub(crate) struct EncodedRequest {
    pub(crate) query: Option<Vec<(String, String)>>,
    pub(crate) body: Option<Vec<u8>>,
}

impl Request {
    /// `path` is relative to the versioned domain and must start with `/`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: Payload::Empty,
            headers: HeaderMap::new(),
            timeout: None,
            include_version: true,
            use_body: false,
            try_auth: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Set the payload.
    ///
    /// On GET and DELETE a mapping becomes the query string unless [`use_body`](Self::use_body)
    /// is set. Text, bytes and frames have no query form and are always sent as the body,
    /// whatever the method.
    pub fn payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Override the session's default content type for this call.
    pub fn content_type(self, content_type: &ContentType) -> Result<Self, MarqueeError> {
        let value = HeaderValue::from_str(content_type.header_value())
            .map_err(|e| MarqueeError::Header(e.to_string()))?;
        Ok(self.header(CONTENT_TYPE, value))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Prefix the path with the session's API version (default `true`).
    pub fn include_version(mut self, include: bool) -> Self {
        self.include_version = include;
        self
    }

    /// Send a GET/DELETE payload as a body instead of the query string.
    pub fn use_body(mut self, use_body: bool) -> Self {
        self.use_body = use_body;
        self
    }

    /// Re-authenticate and resend once on a 401 (default `true`).
    pub fn try_auth(mut self, try_auth: bool) -> Self {
        self.try_auth = try_auth;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The content type the caller pinned via headers, else `default`.
    pub(crate) fn resolved_content_type(&self, default: &ContentType) -> ContentType {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ContentType::from_header)
            .unwrap_or_else(|| default.clone())
    }

    fn payload_in_query(&self) -> bool {
        matches!(self.method, Method::GET | Method::DELETE) && !self.use_body
    }

    pub(crate) fn encode(&self, content_type: &ContentType) -> Result<EncodedRequest, MarqueeError> {
        if self.payload.is_empty() {
            return Ok(EncodedRequest::default());
        }
        if self.payload_in_query()
            && let Some(map) = self.payload.as_map()
        {
            return Ok(EncodedRequest {
                query: Some(query_pairs(map)),
                body: None,
            });
        }
        Ok(EncodedRequest {
            query: None,
            body: self.payload.encode(content_type)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MSGPACK_CONTENT_TYPE;
    use serde_json::json;

    #[test]
    fn get_mapping_goes_to_query() {
        let req = Request::get("/assets").payload(json!({"limit": 5}));
        let encoded = req.encode(&ContentType::Json).unwrap();
        assert_eq!(
            encoded.query,
            Some(vec![("limit".to_string(), "5".to_string())])
        );
        assert!(encoded.body.is_none());
    }

    #[test]
    fn use_body_overrides_query_placement() {
        let req = Request::delete("/assets")
            .payload(json!({"ids": ["a", "b"]}))
            .use_body(true);
        let encoded = req.encode(&ContentType::Json).unwrap();
        assert!(encoded.query.is_none());
        assert_eq!(encoded.body.unwrap(), br#"{"ids":["a","b"]}"#.to_vec());
    }

    #[test]
    fn get_with_non_mapping_payload_sends_a_body() {
        let req = Request::get("/assets/lookup").payload(Payload::Text("SPX,NDX".to_string()));
        let encoded = req.encode(&ContentType::Json).unwrap();
        assert!(encoded.query.is_none());
        assert!(encoded.body.is_some());
    }

    #[test]
    fn post_mapping_goes_to_body() {
        let req = Request::post("/data/query").payload(json!({"where": {"bbid": "SPX"}}));
        let encoded = req.encode(&ContentType::Json).unwrap();
        assert!(encoded.query.is_none());
        assert!(encoded.body.is_some());
    }

    #[test]
    fn empty_mapping_sends_nothing() {
        let req = Request::post("/x").payload(json!({}));
        let encoded = req.encode(&ContentType::Json).unwrap();
        assert!(encoded.query.is_none());
        assert!(encoded.body.is_none());
    }

    #[test]
    fn header_content_type_wins_over_default() {
        let req = Request::post("/x")
            .content_type(&ContentType::MsgPack)
            .unwrap();
        assert_eq!(
            req.resolved_content_type(&ContentType::Json),
            ContentType::MsgPack
        );
        assert_eq!(
            req.headers.get(CONTENT_TYPE).unwrap(),
            MSGPACK_CONTENT_TYPE
        );
        assert_eq!(
            Request::get("/x").resolved_content_type(&ContentType::Json),
            ContentType::Json
        );
    }
}
