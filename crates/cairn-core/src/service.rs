//! Service identity — who we call and where they live.
//!
//! A `ServiceKey` names a remote contract (group, version, signature).
//! A `ProviderAddr` names an endpoint by its literal host string and port.
//! Addresses are compared as written: `localhost:9000` and `127.0.0.1:9000`
//! are two different providers. No DNS resolution happens here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Service Key ───────────────────────────────────────────────────────────────

/// Composite identity of a remote service contract.
///
/// Textual form: `group/version/signature`, e.g. `svc/v1/abc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceKey {
    group: String,
    version: String,
    signature: String,
}

impl ServiceKey {
    /// Components must be non-empty and free of `/`, so every key
    /// survives a trip through its textual form.
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        signature: impl Into<String>,
    ) -> Result<Self, ParseError> {
        let key = Self {
            group: group.into(),
            version: version.into(),
            signature: signature.into(),
        };
        let valid = [&key.group, &key.version, &key.signature]
            .iter()
            .all(|part| !part.is_empty() && !part.contains('/'));
        if valid {
            Ok(key)
        } else {
            Err(ParseError::ServiceKey(key.to_string()))
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.signature)
    }
}

impl FromStr for ServiceKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(g), Some(v), Some(sig), None) => Self::new(g, v, sig),
            _ => Err(ParseError::ServiceKey(s.to_string())),
        }
    }
}

impl TryFrom<String> for ServiceKey {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServiceKey> for String {
    fn from(key: ServiceKey) -> String {
        key.to_string()
    }
}

// ── Provider Address ──────────────────────────────────────────────────────────

/// Remote endpoint of a provider, as announced by the membership feed.
///
/// Equality is hostname-string equality plus port equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderAddr {
    host: String,
    port: u16,
}

impl ProviderAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ProviderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ProviderAddr {
    type Err = ParseError;

    /// Accepts `host:port` and `[v6-literal]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseError::Address(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(bad)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(bad());
        }
        let port = port.parse::<u16>().map_err(|_| bad())?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for ProviderAddr {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderAddr> for String {
    fn from(addr: ProviderAddr) -> String {
        addr.to_string()
    }
}

// ── Provider Metadata ─────────────────────────────────────────────────────────

/// Descriptive data about a provider, carried by CREATE events and
/// snapshotted into the connection wrapper when the connection is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Where the provider listens.
    pub address: ProviderAddr,
    /// The contract the provider was announced for.
    pub service: ServiceKey,
    /// Application name reported by the provider. Informational only.
    #[serde(default)]
    pub application: String,
    /// Per-provider request timeout in milliseconds. 0 = caller decides.
    #[serde(default)]
    pub timeout_ms: u64,
}

impl ProviderMetadata {
    pub fn new(address: ProviderAddr, service: ServiceKey) -> Self {
        Self {
            address,
            service,
            application: String::new(),
            timeout_ms: 0,
        }
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid service key {0:?}: expected group/version/signature")]
    ServiceKey(String),

    #[error("invalid provider address {0:?}: expected host:port")]
    Address(String),
}
