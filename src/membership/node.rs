//! Node identity and endpoint types

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque identity of a cluster member (the platform role-instance id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// Create a node identity, rejecting empty or blank ids
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::Config("node identity cannot be empty".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Network endpoint where a node's CouchDB listens
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Base URL for HTTP requests against this endpoint (with trailing slash)
    pub fn base_url(&self) -> String {
        format!("http://{}/", self)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 literals need brackets to stay parseable
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidEndpoint(s.to_string()))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidEndpoint(s.to_string()));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidEndpoint(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let ep: Endpoint = "10.0.0.4:5984".parse().unwrap();
        assert_eq!(ep.address, "10.0.0.4");
        assert_eq!(ep.port, 5984);
        assert_eq!(ep.to_string(), "10.0.0.4:5984");
        assert_eq!(ep.base_url(), "http://10.0.0.4:5984/");
    }

    #[test]
    fn test_parse_ipv6_endpoint() {
        let ep: Endpoint = "[::1]:5984".parse().unwrap();
        assert_eq!(ep.address, "::1");
        assert_eq!(ep.to_string(), "[::1]:5984");
    }

    #[test]
    fn test_reject_bad_endpoints() {
        assert!("10.0.0.4".parse::<Endpoint>().is_err());
        assert!(":5984".parse::<Endpoint>().is_err());
        assert!("host:notaport".parse::<Endpoint>().is_err());
        assert!("host:70000".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_identity_rejects_blank() {
        assert!(NodeIdentity::new("  ").is_err());
        assert_eq!(NodeIdentity::new("CouchHost_IN_0").unwrap().as_str(), "CouchHost_IN_0");
    }
}
