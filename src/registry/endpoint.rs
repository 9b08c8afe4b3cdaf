//! Server endpoint identity.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A server endpoint: address plus TCP port. Identity is structural
/// equality of both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Failure to parse a `host:port` pair.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseEndpointError {
    #[error("host:port required")]
    MissingPort,
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    /// Splits on the LAST colon so bracketed or numeric IPv6 addresses do
    /// not split prematurely.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let colon = s.rfind(':').ok_or(ParseEndpointError::MissingPort)?;
        let (host, rest) = s.split_at(colon);
        let port = &rest[1..];
        let port: u16 = port
            .parse()
            .map_err(|_| ParseEndpointError::InvalidPort(port.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}

/// One client currently served by a backend, as reported by that backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveClient {
    pub name: String,
    pub ip: String,
}
