use reqwest::StatusCode;
use std::fmt;

/// Classification of a non-2xx response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    /// 401
    Authentication,
    /// 403
    Authorization,
    /// 429
    RateLimited,
    /// 500
    InternalServer,
    /// 504
    Timeout,
    /// Any other non-success status.
    Other,
}

impl RequestErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => RequestErrorKind::Authentication,
            StatusCode::FORBIDDEN => RequestErrorKind::Authorization,
            StatusCode::TOO_MANY_REQUESTS => RequestErrorKind::RateLimited,
            StatusCode::INTERNAL_SERVER_ERROR => RequestErrorKind::InternalServer,
            StatusCode::GATEWAY_TIMEOUT => RequestErrorKind::Timeout,
            _ => RequestErrorKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestErrorKind::Authentication => "authentication",
            RequestErrorKind::Authorization => "authorization",
            RequestErrorKind::RateLimited => "rate limited",
            RequestErrorKind::InternalServer => "internal server",
            RequestErrorKind::Timeout => "timeout",
            RequestErrorKind::Other => "request",
        }
    }
}

impl fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request that completed with a status outside `[200, 300)`.
///
/// `context` has the form `"{request_id}: {method} {path}"` so the failure can be
/// traced back to the server-side log entry.
#[derive(Debug, Clone)]
pub struct RequestError {
    pub status: StatusCode,
    pub message: String,
    pub context: String,
    pub request_id: Option<String>,
}

impl RequestError {
    pub fn new(
        status: StatusCode,
        message: impl Into<String>,
        request_id: Option<String>,
        method: &str,
        path: &str,
    ) -> Self {
        let context = format!(
            "{}: {} {}",
            request_id.as_deref().unwrap_or("-"),
            method,
            path
        );
        Self {
            status,
            message: message.into(),
            context,
            request_id,
        }
    }

    pub fn kind(&self) -> RequestErrorKind {
        RequestErrorKind::from_status(self.status)
    }

    /// 429, 500, 502, 503 and 504 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} error (status {}): {}",
            self.context,
            self.kind(),
            self.status.as_u16(),
            self.message
        )
    }
}

impl std::error::Error for RequestError {}

#[derive(Debug, thiserror::Error)]
pub enum MarqueeError {
    #[error("client error: {0}")]
    Client(String),

    #[error("invalid value: {0}")]
    Value(String),

    #[error("type error: {0}")]
    Type(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("session uninitialised: {0}")]
    Uninitialised(String),

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<MarqueeError>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("invalid header: {0}")]
    Header(String),

    #[error("websocket error: {0}")]
    Ws(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl MarqueeError {
    pub fn wrap<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MarqueeError::Wrapped(Box::new(err))
    }

    /// The underlying request error, looking through retry exhaustion.
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            MarqueeError::Request(err) => Some(err),
            MarqueeError::RetriesExhausted { source, .. } => source.request_error(),
            _ => None,
        }
    }

    pub fn request_kind(&self) -> Option<RequestErrorKind> {
        self.request_error().map(RequestError::kind)
    }

    /// Client-side timeouts count as transient alongside retryable statuses.
    pub fn is_timeout(&self) -> bool {
        match self {
            MarqueeError::Transport(err) => err.is_timeout(),
            other => other.request_kind() == Some(RequestErrorKind::Timeout),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            MarqueeError::Request(err) => err.is_retryable(),
            MarqueeError::Transport(err) => err.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_status() {
        let cases = [
            (StatusCode::UNAUTHORIZED, RequestErrorKind::Authentication),
            (StatusCode::FORBIDDEN, RequestErrorKind::Authorization),
            (StatusCode::TOO_MANY_REQUESTS, RequestErrorKind::RateLimited),
            (StatusCode::INTERNAL_SERVER_ERROR, RequestErrorKind::InternalServer),
            (StatusCode::GATEWAY_TIMEOUT, RequestErrorKind::Timeout),
            (StatusCode::NOT_FOUND, RequestErrorKind::Other),
        ];
        for (status, kind) in cases {
            assert_eq!(RequestErrorKind::from_status(status), kind);
        }
    }

    #[test]
    fn context_carries_request_id_method_and_path() {
        let err = RequestError::new(
            StatusCode::BAD_REQUEST,
            "bad field",
            Some("req-42".to_string()),
            "POST",
            "/v1/data/query",
        );
        assert_eq!(err.context, "req-42: POST /v1/data/query");
        let text = err.to_string();
        assert!(text.contains("req-42"));
        assert!(text.contains("bad field"));
    }

    #[test]
    fn retryable_statuses() {
        for status in [429u16, 500, 502, 503, 504] {
            let err = RequestError::new(
                StatusCode::from_u16(status).unwrap(),
                "",
                None,
                "GET",
                "/x",
            );
            assert!(err.is_retryable(), "{status} should be retryable");
        }
        for status in [400u16, 401, 403, 404] {
            let err = RequestError::new(
                StatusCode::from_u16(status).unwrap(),
                "",
                None,
                "GET",
                "/x",
            );
            assert!(!err.is_retryable(), "{status} should be terminal");
        }
    }

    #[test]
    fn request_kind_looks_through_exhaustion() {
        let inner = MarqueeError::Request(RequestError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "slow down",
            None,
            "GET",
            "/x",
        ));
        let err = MarqueeError::RetriesExhausted {
            operation: "get_coverage".to_string(),
            attempts: 5,
            source: Box::new(inner),
        };
        assert_eq!(err.request_kind(), Some(RequestErrorKind::RateLimited));
        assert!(err.to_string().contains("get_coverage"));
    }
}
