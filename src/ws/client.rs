use crate::error::MarqueeError;
use crate::rest::Session;

use futures::{SinkExt, StreamExt};
use reqwest::header::{COOKIE, HeaderMap};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn ws_err(err: impl std::fmt::Display) -> MarqueeError {
    MarqueeError::Ws(err.to_string())
}

/// Streaming connection to a Marquee websocket endpoint.
///
/// Opened with the session's credentials; messages are passed through as JSON.
pub struct MarqueeWsClient {
    write: futures::stream::SplitSink<WsStream, Message>,
    read: futures::stream::SplitStream<WsStream>,
    url: Url,
}

impl MarqueeWsClient {
    /// Connect to `{ws_domain}/{version}{path}` carrying the session's authorization and
    /// cookies. `headers` are added last and win over both.
    pub async fn connect(
        session: &Session,
        path: &str,
        headers: Option<HeaderMap>,
    ) -> Result<Self, MarqueeError> {
        session.ensure_authenticated().await?;

        let env = session.environment();
        let url = Url::parse(&format!(
            "{}/{}{}",
            env.ws_domain.as_str().trim_end_matches('/'),
            session.api_version(),
            path
        ))?;
        // The cookie jar keys on the https origin.
        let cookie_url = Url::parse(&session.url_for(path, true))?;

        let mut req = url.as_str().into_client_request().map_err(ws_err)?;
        if let Some(auth) = session.authorization().await {
            req.headers_mut().insert(AUTHORIZATION, auth);
        }
        if let Some(cookies) = session.cookie_header(&cookie_url) {
            req.headers_mut().insert(COOKIE, cookies);
        }
        if let Some(headers) = headers {
            for (name, value) in headers.iter() {
                req.headers_mut().insert(name.clone(), value.clone());
            }
        }

        debug!(url = %url, "opening websocket");
        let (ws_stream, _resp) = connect_async(req).await.map_err(ws_err)?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn send_json<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<(), MarqueeError> {
        let text = serde_json::to_string(message)?;
        self.write.send(Message::Text(text)).await.map_err(ws_err)
    }

    /// Next JSON message. Pings are answered here; `None` once the server closes.
    pub async fn next_message(&mut self) -> Result<Option<Value>, MarqueeError> {
        while let Some(msg) = self.read.next().await {
            match msg.map_err(ws_err)? {
                Message::Text(s) => return Ok(Some(serde_json::from_str(&s)?)),
                Message::Binary(b) => return Ok(Some(serde_json::from_slice(&b)?)),
                Message::Ping(payload) => {
                    self.write.send(Message::Pong(payload)).await.map_err(ws_err)?;
                }
                Message::Close(frame) => {
                    debug!(url = %self.url, ?frame, "websocket closed by server");
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Send a close frame and shut the write half.
    pub async fn close(mut self) -> Result<(), MarqueeError> {
        self.write.close().await.map_err(ws_err)
    }
}

impl Session {
    /// Open a websocket on this session. See [`MarqueeWsClient::connect`].
    pub async fn connect_websocket(
        &self,
        path: &str,
        headers: Option<HeaderMap>,
    ) -> Result<MarqueeWsClient, MarqueeError> {
        MarqueeWsClient::connect(self, path, headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MarqueeEnvironment;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    #[tokio::test]
    async fn connects_with_session_authorization_and_echoes_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Arc<Mutex<Option<(String, Option<String>, Option<String>)>>> =
            Arc::new(Mutex::new(None));
        let seen_server = seen.clone();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                *seen_server.lock().unwrap() = Some((
                    req.uri().path().to_string(),
                    header("authorization"),
                    header("x-trace"),
                ));
                Ok(resp)
            };
            let mut ws = accept_hdr_async(stream, callback).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() {
                    ws.send(Message::Ping(vec![1])).await.unwrap();
                    ws.send(msg).await.unwrap();
                } else if msg.is_close() {
                    break;
                }
            }
        });

        let origin = Url::parse(&format!("http://{addr}")).unwrap();
        let env = MarqueeEnvironment::custom(origin.clone(), origin.join("/oauth/token").unwrap())
            .unwrap();
        let session = Session::builder(env).with_token("ws-token").build().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-trace", HeaderValue::from_static("abc"));
        let mut client = session
            .connect_websocket("/data/stream", Some(headers))
            .await
            .expect("connect");
        assert_eq!(client.url().scheme(), "ws");

        client
            .send_json(&json!({"subscribe": ["EDRVOL"]}))
            .await
            .expect("send");
        let echoed = client.next_message().await.expect("read");
        assert_eq!(echoed, Some(json!({"subscribe": ["EDRVOL"]})));
        client.close().await.expect("close");
        server.await.unwrap();

        let (path, auth, trace) = seen.lock().unwrap().clone().expect("handshake seen");
        assert_eq!(path, "/v1/data/stream");
        assert_eq!(auth.as_deref(), Some("Bearer ws-token"));
        assert_eq!(trace.as_deref(), Some("abc"));
    }
}
