//! Scripted HTTP server for exercising the transport end to end.

use crate::env::MarqueeEnvironment;
use crate::rest::Session;

use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

#[derive(Clone)]
pub(crate) struct TestHttpResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl TestHttpResponse {
    pub(crate) fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub(crate) fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self::new(status, body.to_string()).with_header("Content-Type", "application/json")
    }

    pub(crate) fn ok(body: serde_json::Value) -> Self {
        Self::json(StatusCode::OK, body)
    }

    pub(crate) fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    /// Path plus query string, as sent on the request line.
    pub(crate) target: String,
    /// Header names lowercased.
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    pub(crate) fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

pub(crate) struct TestServer {
    pub(crate) origin: Url,
    pub(crate) hits: Arc<AtomicUsize>,
    pub(crate) requests: Arc<Mutex<Vec<RecordedRequest>>>,
    pub(crate) task: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn env(&self) -> MarqueeEnvironment {
        MarqueeEnvironment::custom(
            self.origin.clone(),
            self.origin.join("/oauth/token").expect("auth url"),
        )
        .expect("test env")
    }

    /// A session authenticated with a fixed bearer token.
    pub(crate) fn token_session(&self) -> Session {
        Session::builder(self.env())
            .with_token("test-token")
            .build()
            .expect("build session")
    }

    pub(crate) async fn finish(self) {
        self.task.await.expect("server").expect("server ok");
    }
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

async fn read_http_request(
    stream: &mut tokio::net::TcpStream,
) -> std::io::Result<Option<RecordedRequest>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 2048];
    let mut header_len: Option<usize> = None;
    let mut required_body_len: usize = 0;

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);

        if header_len.is_none()
            && let Some(end) = header_end(&buffer)
        {
            header_len = Some(end);
            let head = String::from_utf8_lossy(&buffer[..end]).to_ascii_lowercase();
            required_body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
        }

        if let Some(header_len) = header_len
            && buffer.len().saturating_sub(header_len) >= required_body_len
        {
            return Ok(Some(parse_request(&buffer, header_len)));
        }
    }
}

fn parse_request(buffer: &[u8], header_len: usize) -> RecordedRequest {
    let head = String::from_utf8_lossy(&buffer[..header_len]);
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    RecordedRequest {
        method,
        target,
        headers,
        body: buffer[header_len..].to_vec(),
    }
}

/// Serve `responses` in order, one connection each, then stop.
pub(crate) async fn spawn_http_sequence_server(responses: Vec<TestHttpResponse>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_ref = Arc::clone(&hits);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let requests_ref = Arc::clone(&requests);

    let task = tokio::spawn(async move {
        for response in responses {
            let (mut stream, _) = listener.accept().await?;
            if let Some(request) = read_http_request(&mut stream).await? {
                requests_ref.lock().expect("requests lock").push(request);
            }
            hits_ref.fetch_add(1, Ordering::Relaxed);

            let reason = response.status.canonical_reason().unwrap_or("Unknown");
            let mut reply = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                response.status.as_u16(),
                reason,
                response.body.len()
            );
            for (key, value) in response.headers {
                reply.push_str(&format!("{key}: {value}\r\n"));
            }
            reply.push_str("\r\n");

            let mut bytes = reply.into_bytes();
            bytes.extend_from_slice(&response.body);
            stream.write_all(&bytes).await?;
            stream.flush().await?;
        }
        Ok(())
    });

    TestServer {
        origin: Url::parse(&format!("http://{addr}")).expect("url"),
        hits,
        requests,
        task,
    }
}
