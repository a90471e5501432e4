//! Broker authority: scheme, host and port.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::HostError;

const LOCAL_SCHEME: &str = "local";

/// Identity of a broker, derived once from its address.
///
/// Two connectors with equal authorities share a credential gate and a
/// credential store; connectors with different authorities never contend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Authority {
    scheme: String,
    host: String,
    port: u16,
}

impl Authority {
    /// Derive the authority from a broker URL.
    ///
    /// Path, query and fragment are discarded. A missing port falls back to
    /// the scheme's well-known default.
    ///
    /// # Errors
    /// Returns `HostError::Config` if the URL has no host or no resolvable port.
    pub fn from_url(url: &Url) -> Result<Self, HostError> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| HostError::Config(format!("broker address has no host: {url}")))?;
        let port = url.port_or_known_default().ok_or_else(|| {
            HostError::Config(format!("broker address has no port and scheme `{}` has no default", url.scheme()))
        })?;

        Ok(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// Parse a broker address and derive its authority.
    ///
    /// # Errors
    /// Returns `HostError::Config` if the address is not a valid URL.
    pub fn parse(address: &str) -> Result<Self, HostError> {
        let url = Url::parse(address)
            .map_err(|e| HostError::Config(format!("invalid broker address `{address}`: {e}")))?;
        Self::from_url(&url)
    }

    /// Authority used by connectors for hosts on this machine.
    #[must_use]
    pub fn local() -> Self {
        Self {
            scheme: LOCAL_SCHEME.to_string(),
            host: "localhost".to_string(),
            port: 0,
        }
    }

    /// Whether this is the local pseudo-authority.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.scheme == LOCAL_SCHEME
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_path_and_fragment() {
        let a = Authority::parse("https://broker.example.com:5444/some/path#session").unwrap();
        assert_eq!(a.scheme(), "https");
        assert_eq!(a.host(), "broker.example.com");
        assert_eq!(a.port(), 5444);
        assert_eq!(a.to_string(), "https://broker.example.com:5444/");
    }

    #[test]
    fn test_default_port_and_case() {
        let a = Authority::parse("HTTPS://Broker.Example.COM/").unwrap();
        let b = Authority::parse("https://broker.example.com:443/other").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.port(), 443);
    }

    #[test]
    fn test_rejects_hostless_address() {
        let err = Authority::parse("file:///tmp/broker").unwrap_err();
        assert!(matches!(err, HostError::Config(_)));
    }

    #[test]
    fn test_local_authority() {
        let local = Authority::local();
        assert!(local.is_local());
        assert!(!Authority::parse("http://localhost:80").unwrap().is_local());
    }
}
