use crate::auth::{Credentials, NativeAuthenticator, REQUEST_ID_HEADER};
use crate::cache::{DEFAULT_TTL, TtlCache};
use crate::codec::{ContentType, MSGPACK_CONTENT_TYPE, Payload, decode_body};
use crate::env::{API_VERSION, MarqueeEnvironment};
use crate::error::{MarqueeError, RequestError};
use crate::rest::request::{EncodedRequest, Request};
use crate::rest::response::Response;
use crate::retry::RetryPolicy;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use reqwest::{Client, Proxy, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Per-call timeout when neither the request nor the builder sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(65);

const X_APPLICATION: HeaderName = HeaderName::from_static("x-application");
const X_VERSION: HeaderName = HeaderName::from_static("x-version");

tokio::task_local! {
    static CURRENT_SESSION: Session;
}

/// Run `fut` with `session` installed as the ambient session.
///
/// The session is visible to [`Session::current`] anywhere inside `fut`, including nested
/// `.await`s, and is removed when `fut` completes. Tasks spawned from inside the scope do
/// not inherit it.
pub async fn scope<F: Future>(session: Session, fut: F) -> F::Output {
    CURRENT_SESSION.scope(session, fut).await
}

/// Blocking counterpart of [`scope`].
pub fn sync_scope<R>(session: Session, f: impl FnOnce() -> R) -> R {
    CURRENT_SESSION.sync_scope(session, f)
}

/// Builder for [`Session`].
///
/// Credentials are resolved in a fixed order regardless of call order: client id and
/// secret first, then a bearer token, then a native authenticator.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    env: MarqueeEnvironment,
    client_credentials: Option<Credentials>,
    token: Option<Credentials>,
    native: Option<Credentials>,
    api_version: String,
    application: String,
    application_version: String,
    verify_tls: bool,
    timeout: Duration,
    connect_timeout: Option<Duration>,
    default_headers: HeaderMap,
    content_type: ContentType,
    proxy: Option<Proxy>,
    http_client: Option<Arc<Client>>,
    retry_policy: RetryPolicy,
    cache_ttl: Duration,
}

impl SessionBuilder {
    fn new(env: MarqueeEnvironment) -> Self {
        Self {
            env,
            client_credentials: None,
            token: None,
            native: None,
            api_version: API_VERSION.to_string(),
            application: env!("CARGO_PKG_NAME").to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
            verify_tls: true,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
            default_headers: HeaderMap::new(),
            content_type: ContentType::Json,
            proxy: None,
            http_client: None,
            retry_policy: RetryPolicy::default(),
            cache_ttl: DEFAULT_TTL,
        }
    }

    /// OAuth2 client-credentials grant. `scopes` defaults to `read_product_data`.
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scopes: Option<Vec<String>>,
    ) -> Self {
        self.client_credentials = Some(Credentials::client_credentials(
            client_id,
            client_secret,
            scopes,
        ));
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Credentials::Token(token.into()));
        self
    }

    pub fn with_native_authenticator(mut self, authenticator: Arc<dyn NativeAuthenticator>) -> Self {
        self.native = Some(Credentials::Native(authenticator));
        self
    }

    pub fn with_credentials(self, credentials: Credentials) -> Self {
        match credentials {
            c @ Credentials::ClientCredentials { .. } => Self {
                client_credentials: Some(c),
                ..self
            },
            c @ Credentials::Token(_) => Self {
                token: Some(c),
                ..self
            },
            c @ Credentials::Native(_) => Self {
                native: Some(c),
                ..self
            },
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Values for the `X-Application` / `X-Version` headers.
    pub fn with_application(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.application = name.into();
        self.application_version = version.into();
        self
    }

    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Default encoding for request bodies (JSON unless set).
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Share an existing connection pool. The session never tears a shared adapter down.
    pub fn with_http_client(mut self, client: Arc<Client>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Lifetime of cached dataset metadata. Zero disables the cache.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn build(self) -> Result<Session, MarqueeError> {
        let credentials = self
            .client_credentials
            .or(self.token)
            .or(self.native)
            .ok_or_else(|| {
                MarqueeError::Uninitialised(
                    "no client credentials, token or native authenticator supplied".to_string(),
                )
            })?;

        let application = HeaderValue::from_str(&self.application)
            .map_err(|e| MarqueeError::Header(e.to_string()))?;
        let application_version = HeaderValue::from_str(&self.application_version)
            .map_err(|e| MarqueeError::Header(e.to_string()))?;

        Ok(Session {
            inner: Arc::new(SessionInner {
                env: self.env,
                credentials,
                api_version: self.api_version,
                application,
                application_version,
                verify_tls: self.verify_tls,
                timeout: self.timeout,
                connect_timeout: self.connect_timeout,
                default_headers: self.default_headers,
                content_type: self.content_type,
                proxy: self.proxy,
                shared_http: self.http_client,
                transport: Mutex::new(None),
                cookies: Arc::new(Jar::default()),
                authorization: tokio::sync::RwLock::new(None),
                authenticated: AtomicBool::new(false),
                auth_lock: tokio::sync::Mutex::new(()),
                retry_policy: self.retry_policy,
                metadata: TtlCache::new(self.cache_ttl),
            }),
        })
    }
}

struct SessionInner {
    env: MarqueeEnvironment,
    credentials: Credentials,
    api_version: String,
    application: HeaderValue,
    application_version: HeaderValue,
    verify_tls: bool,
    timeout: Duration,
    connect_timeout: Option<Duration>,
    default_headers: HeaderMap,
    content_type: ContentType,
    proxy: Option<Proxy>,
    shared_http: Option<Arc<Client>>,
    /// Lazily built on first use; `None` after `close()`.
    transport: Mutex<Option<Arc<Client>>>,
    cookies: Arc<Jar>,
    authorization: tokio::sync::RwLock<Option<HeaderValue>>,
    authenticated: AtomicBool,
    auth_lock: tokio::sync::Mutex<()>,
    retry_policy: RetryPolicy,
    metadata: TtlCache<Value>,
}

/// One authenticated context bound to a domain and API version.
///
/// Cloning is cheap and clones share everything: transport, authorization, cookies and
/// the metadata cache. A re-authentication triggered through one clone is visible to all.
///
/// ```no_run
/// use marquee_client::{MarqueeEnvironment, Session};
/// use serde_json::Value;
///
/// # async fn run() -> Result<(), marquee_client::MarqueeError> {
/// let session = Session::builder(MarqueeEnvironment::prod()?)
///     .with_client_credentials("client-id", "client-secret", None)
///     .build()?;
/// let asset: Value = session.get("/assets/MA4B66MW5E27U8P32SB", ()).await?;
/// session.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("domain", &self.inner.env.domain.as_str())
            .field("api_version", &self.inner.api_version)
            .field("credentials", &self.inner.credentials)
            .field("shared_adapter", &self.inner.shared_http.is_some())
            .finish()
    }
}

impl Session {
    pub fn builder(env: MarqueeEnvironment) -> SessionBuilder {
        SessionBuilder::new(env)
    }

    /// The ambient session installed by [`scope`].
    pub fn current() -> Result<Session, MarqueeError> {
        CURRENT_SESSION.try_with(Session::clone).map_err(|_| {
            MarqueeError::Uninitialised(
                "no ambient session; run the call inside marquee_client::scope".to_string(),
            )
        })
    }

    /// Run `fut` with this session as the ambient one.
    pub async fn scoped<F: Future>(&self, fut: F) -> F::Output {
        scope(self.clone(), fut).await
    }

    pub fn environment(&self) -> &MarqueeEnvironment {
        &self.inner.env
    }

    pub fn api_version(&self) -> &str {
        &self.inner.api_version
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry_policy
    }

    pub(crate) fn metadata_cache(&self) -> &TtlCache<Value> {
        &self.inner.metadata
    }

    /// Whether a transport is currently live.
    pub fn is_open(&self) -> bool {
        self.transport_slot().is_some()
    }

    /// Whether the HTTP adapter was supplied by the caller.
    pub fn shares_adapter(&self) -> bool {
        self.inner.shared_http.is_some()
    }

    /// `{domain}[/{version}]{path}`.
    pub fn url_for(&self, path: &str, include_version: bool) -> String {
        if include_version {
            format!(
                "{}/{}{}",
                self.inner.env.domain_root(),
                self.inner.api_version,
                path
            )
        } else {
            format!("{}{}", self.inner.env.domain_root(), path)
        }
    }

    fn transport_slot(&self) -> MutexGuard<'_, Option<Arc<Client>>> {
        self.inner
            .transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn http(&self) -> Result<Arc<Client>, MarqueeError> {
        let mut slot = self.transport_slot();
        if let Some(http) = slot.as_ref() {
            return Ok(Arc::clone(http));
        }
        let http = match &self.inner.shared_http {
            Some(shared) => Arc::clone(shared),
            None => Arc::new(self.build_client()?),
        };
        debug!(shared = self.shares_adapter(), "opened transport");
        *slot = Some(Arc::clone(&http));
        Ok(http)
    }

    fn build_client(&self) -> Result<Client, MarqueeError> {
        let mut builder = Client::builder()
            .cookie_provider(Arc::clone(&self.inner.cookies))
            .timeout(self.inner.timeout);
        if !self.inner.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = self.inner.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(proxy) = &self.inner.proxy {
            builder = builder.proxy(proxy.clone());
        }
        Ok(builder.build()?)
    }

    /// Drop the transport. A caller-supplied adapter is only released, never torn down;
    /// the next call on this session opens a fresh transport.
    pub fn close(&self) {
        let Some(http) = self.transport_slot().take() else {
            return;
        };
        match &self.inner.shared_http {
            Some(shared) if Arc::ptr_eq(&http, shared) => {
                debug!("released shared transport");
            }
            _ => info!(domain = self.inner.env.domain.as_str(), "closed session transport"),
        }
    }

    /// Authenticate eagerly instead of on the first request.
    pub async fn init(&self) -> Result<(), MarqueeError> {
        self.authenticate().await
    }

    /// Run the credential exchange and install the resulting authorization.
    pub async fn authenticate(&self) -> Result<(), MarqueeError> {
        let _guard = self.inner.auth_lock.lock().await;
        self.authenticate_locked().await
    }

    async fn authenticate_locked(&self) -> Result<(), MarqueeError> {
        let http = self.http()?;
        let header = self
            .inner
            .credentials
            .authorize(&http, &self.inner.env, self.inner.timeout)
            .await?;
        *self.inner.authorization.write().await = header;
        self.inner.authenticated.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) async fn ensure_authenticated(&self) -> Result<(), MarqueeError> {
        if self.inner.authenticated.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.inner.auth_lock.lock().await;
        if self.inner.authenticated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.authenticate_locked().await
    }

    /// The `Authorization` value currently installed, if any.
    pub(crate) async fn authorization(&self) -> Option<HeaderValue> {
        self.inner.authorization.read().await.clone()
    }

    /// Cookies the session holds for `url`.
    pub(crate) fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        self.inner.cookies.cookies(url)
    }

    /// Send `request`, re-authenticating and resending once if the first response is 401.
    pub async fn execute(&self, request: Request) -> Result<Response, MarqueeError> {
        self.ensure_authenticated().await?;

        let content_type = request.resolved_content_type(&self.inner.content_type);
        let encoded = request.encode(&content_type)?;
        let url = Url::parse(&self.url_for(&request.path, request.include_version))?;

        let mut resp = self.dispatch(&request, &url, &content_type, &encoded).await?;
        if resp.status() == StatusCode::UNAUTHORIZED && request.try_auth {
            warn!(
                method = %request.method,
                path = %request.path,
                "401 received, re-authenticating"
            );
            self.authenticate().await?;
            resp = self.dispatch(&request, &url, &content_type, &encoded).await?;
        }

        self.finish(&request, resp).await
    }

    async fn dispatch(
        &self,
        request: &Request,
        url: &Url,
        content_type: &ContentType,
        encoded: &EncodedRequest,
    ) -> Result<reqwest::Response, MarqueeError> {
        let http = self.http()?;

        let mut headers = self.inner.default_headers.clone();
        headers.insert(X_APPLICATION, self.inner.application.clone());
        headers.insert(X_VERSION, self.inner.application_version.clone());
        if let Some(authorization) = self.authorization().await {
            headers.insert(AUTHORIZATION, authorization);
        }
        if *content_type == ContentType::MsgPack {
            headers.insert(ACCEPT, HeaderValue::from_static(MSGPACK_CONTENT_TYPE));
        }
        headers.extend(request.headers.clone());

        let mut builder = http
            .request(request.method.clone(), url.clone())
            .timeout(request.timeout.unwrap_or(self.inner.timeout));
        if let Some(query) = &encoded.query {
            builder = builder.query(query);
        }
        if let Some(body) = &encoded.body {
            if !headers.contains_key(CONTENT_TYPE) {
                let value = HeaderValue::from_str(content_type.header_value())
                    .map_err(|e| MarqueeError::Header(e.to_string()))?;
                headers.insert(CONTENT_TYPE, value);
            }
            builder = builder.body(body.clone());
        }

        debug!(method = %request.method, %url, "dispatching request");
        Ok(builder.headers(headers).send().await?)
    }

    async fn finish(
        &self,
        request: &Request,
        resp: reqwest::Response,
    ) -> Result<Response, MarqueeError> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            return Err(RequestError::new(
                status,
                String::from_utf8_lossy(&bytes),
                request_id,
                request.method.as_str(),
                &request.path,
            )
            .into());
        }

        debug!(
            status = status.as_u16(),
            request_id = request_id.as_deref().unwrap_or("-"),
            "request succeeded"
        );
        let body = decode_body(
            headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            bytes,
        )?;
        Ok(Response {
            status,
            request_id,
            headers,
            body,
        })
    }

    // -----------------------------------------------
    // Verbs
    // -----------------------------------------------

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
    ) -> Result<T, MarqueeError> {
        self.execute(Request::get(path).payload(payload))
            .await?
            .json()
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
    ) -> Result<T, MarqueeError> {
        self.execute(Request::post(path).payload(payload))
            .await?
            .json()
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
    ) -> Result<T, MarqueeError> {
        self.execute(Request::put(path).payload(payload))
            .await?
            .json()
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
    ) -> Result<T, MarqueeError> {
        self.execute(Request::delete(path).payload(payload))
            .await?
            .json()
    }
}
