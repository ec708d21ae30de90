use crate::env::MarqueeEnvironment;
use crate::error::{MarqueeError, RequestError};

use futures::future::BoxFuture;
use reqwest::Client;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Scopes requested when none are supplied.
pub const DEFAULT_SCOPES: &[&str] = &["read_product_data"];

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-dash-requestid";

/// Hook for environment-specific sign-on (Kerberos, SSO, ...).
///
/// Implementations authenticate with the session's own HTTP client, so any cookies the
/// exchange sets land in the session cookie jar. They may also return an
/// `Authorization` header value to install.
pub trait NativeAuthenticator: Send + Sync {
    fn authenticate<'a>(
        &'a self,
        http: &'a Client,
        env: &'a MarqueeEnvironment,
    ) -> BoxFuture<'a, Result<Option<String>, MarqueeError>>;
}

/// How a [`Session`](crate::Session) obtains its authorization.
#[derive(Clone)]
pub enum Credentials {
    /// OAuth2 client-credentials grant against the environment's auth URL.
    ClientCredentials {
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
    },
    /// Pre-issued bearer token, installed as-is.
    Token(String),
    /// Platform-native sign-on delegated to an external authenticator.
    Native(Arc<dyn NativeAuthenticator>),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ClientCredentials {
                client_id, scopes, ..
            } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .field("scopes", scopes)
                .finish(),
            Credentials::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
            Credentials::Native(_) => f.debug_tuple("Native").finish(),
        }
    }
}

impl Credentials {
    pub fn client_credentials(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scopes: Option<Vec<String>>,
    ) -> Self {
        Credentials::ClientCredentials {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: scopes
                .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::ClientCredentials { .. } => "oauth2",
            Credentials::Token(_) => "token",
            Credentials::Native(_) => "native",
        }
    }

    /// Run the credential exchange and return the `Authorization` value to install.
    pub(crate) async fn authorize(
        &self,
        http: &Client,
        env: &MarqueeEnvironment,
        timeout: Duration,
    ) -> Result<Option<HeaderValue>, MarqueeError> {
        let header = match self {
            Credentials::ClientCredentials {
                client_id,
                client_secret,
                scopes,
            } => {
                let token =
                    client_credentials_grant(http, env, client_id, client_secret, scopes, timeout)
                        .await?;
                Some(bearer(&token)?)
            }
            Credentials::Token(token) => Some(bearer(token)?),
            Credentials::Native(authenticator) => match authenticator.authenticate(http, env).await? {
                Some(value) => Some(
                    HeaderValue::from_str(&value)
                        .map_err(|e| MarqueeError::Header(e.to_string()))?,
                ),
                None => None,
            },
        };
        info!(kind = self.kind(), "authenticated");
        Ok(header)
    }
}

fn bearer(token: &str) -> Result<HeaderValue, MarqueeError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| MarqueeError::Header(e.to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

async fn client_credentials_grant(
    http: &Client,
    env: &MarqueeEnvironment,
    client_id: &str,
    client_secret: &str,
    scopes: &[String],
    timeout: Duration,
) -> Result<String, MarqueeError> {
    let scope = scopes.join(" ");
    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("scope", scope.as_str()),
    ];

    let resp = http
        .post(env.auth_url.clone())
        .form(&form)
        .timeout(timeout)
        .send()
        .await?;

    let status = resp.status();
    let request_id = resp
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let bytes = resp.bytes().await?;

    if !status.is_success() {
        return Err(RequestError::new(
            status,
            String::from_utf8_lossy(&bytes),
            request_id,
            "POST",
            env.auth_url.path(),
        )
        .into());
    }

    let token: TokenResponse = serde_json::from_slice(&bytes)?;
    Ok(token.access_token)
}
