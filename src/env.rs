use crate::error::MarqueeError;

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Default API version prefixed to request paths.
pub const API_VERSION: &str = "v1";

const PACKAGED_CONFIG: &str = include_str!("../config/environments.json");

/// Named deployment of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Dev,
    Qa,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Qa => "QA",
            Environment::Prod => "PROD",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = MarqueeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEV" => Ok(Environment::Dev),
            "QA" => Ok(Environment::Qa),
            "PROD" => Ok(Environment::Prod),
            other => Err(MarqueeError::Value(format!("unknown environment: {other}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    domain: String,
    auth_url: String,
    ws_domain: String,
}

#[derive(Debug, Clone)]
struct EnvironmentEntry {
    domain: Url,
    auth_url: Url,
    ws_domain: Url,
}

impl TryFrom<RawEntry> for EnvironmentEntry {
    type Error = MarqueeError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            domain: Url::parse(&raw.domain)?,
            auth_url: Url::parse(&raw.auth_url)?,
            ws_domain: Url::parse(&raw.ws_domain)?,
        })
    }
}

/// Domains keyed by environment name, read from a JSON config file.
///
/// The crate ships a copy in `config/environments.json`; [`EnvironmentConfig::packaged`]
/// parses that embedded copy.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    entries: HashMap<String, EnvironmentEntry>,
}

impl EnvironmentConfig {
    pub fn packaged() -> Result<Self, MarqueeError> {
        Self::from_json(PACKAGED_CONFIG)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MarqueeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse a config document. Every URL is parsed up front.
    pub fn from_json(text: &str) -> Result<Self, MarqueeError> {
        let raw: HashMap<String, RawEntry> = serde_json::from_str(text)?;
        let entries = raw
            .into_iter()
            .map(|(name, entry)| -> Result<_, MarqueeError> {
                Ok((name.to_ascii_uppercase(), EnvironmentEntry::try_from(entry)?))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { entries })
    }

    pub fn environment(&self, name: Environment) -> Result<MarqueeEnvironment, MarqueeError> {
        let entry = self.entries.get(name.as_str()).ok_or_else(|| {
            MarqueeError::Value(format!("environment {name} missing from config"))
        })?;
        Ok(MarqueeEnvironment {
            name: Some(name),
            domain: entry.domain.clone(),
            auth_url: entry.auth_url.clone(),
            ws_domain: entry.ws_domain.clone(),
        })
    }
}

/// Resolved endpoints a [`Session`](crate::Session) talks to.
#[derive(Debug, Clone)]
pub struct MarqueeEnvironment {
    /// `None` for ad-hoc environments built with [`MarqueeEnvironment::custom`].
    pub name: Option<Environment>,
    pub domain: Url,
    pub auth_url: Url,
    pub ws_domain: Url,
}

impl MarqueeEnvironment {
    /// Look up a named environment in the packaged config.
    pub fn named(name: Environment) -> Result<Self, MarqueeError> {
        EnvironmentConfig::packaged()?.environment(name)
    }

    pub fn prod() -> Result<Self, MarqueeError> {
        Self::named(Environment::Prod)
    }

    pub fn qa() -> Result<Self, MarqueeError> {
        Self::named(Environment::Qa)
    }

    pub fn dev() -> Result<Self, MarqueeError> {
        Self::named(Environment::Dev)
    }

    /// Point at an arbitrary domain; the websocket domain is derived from it.
    pub fn custom(domain: Url, auth_url: Url) -> Result<Self, MarqueeError> {
        let ws_domain = websocket_origin(&domain)?;
        Ok(Self {
            name: None,
            domain,
            auth_url,
            ws_domain,
        })
    }

    /// Domain without a trailing slash, ready for `{domain}{/version}{path}` joining.
    pub fn domain_root(&self) -> &str {
        self.domain.as_str().trim_end_matches('/')
    }
}

fn websocket_origin(domain: &Url) -> Result<Url, MarqueeError> {
    let mut ws = domain.clone();
    let scheme = match domain.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(MarqueeError::Value(format!(
                "cannot derive websocket scheme from {other}"
            )));
        }
    };
    ws.set_scheme(scheme)
        .map_err(|_| MarqueeError::Value(format!("cannot set scheme {scheme}")))?;
    Ok(ws)
}
