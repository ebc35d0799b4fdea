//! Hub URL generation and parsing
//!
//! Format: mentorchat://<host>:<port>/<token>

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};

const SCHEME: &str = "mentorchat://";

/// Where a hub listens and the token it expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubUrl {
    pub host: IpAddr,
    pub port: u16,
    pub token: String,
}

impl HubUrl {
    pub fn new(host: IpAddr, port: u16, token: String) -> Self {
        Self { host, port, token }
    }

    /// Create from a socket address
    pub fn from_addr(addr: SocketAddr, token: String) -> Self {
        Self {
            host: addr.ip(),
            port: addr.port(),
            token,
        }
    }

    /// Get the socket address for connection
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Format as URL string
    pub fn to_url(&self) -> String {
        format!("{}{}/{}", SCHEME, self.socket_addr(), self.token)
    }

    /// Parse from URL string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.strip_prefix(SCHEME).ok_or_else(|| {
            Error::Protocol(format!("Invalid hub URL: missing {} prefix", SCHEME))
        })?;

        let (host_port, token) = s
            .split_once('/')
            .ok_or_else(|| Error::Protocol("Invalid hub URL: expected host:port/token".into()))?;

        let addr: SocketAddr = host_port.parse().map_err(|_| {
            Error::Protocol(format!("Invalid hub URL: bad address '{}'", host_port))
        })?;

        if token.is_empty() || token.contains('/') {
            return Err(Error::Protocol("Invalid hub URL: bad token".into()));
        }

        Ok(Self::from_addr(addr, token.to_string()))
    }
}

impl std::fmt::Display for HubUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

impl FromStr for HubUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
