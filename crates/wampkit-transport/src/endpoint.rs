use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use crate::error::{Result, TransportError};

/// IP version a router endpoint listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    #[default]
    V4,
    V6,
}

impl IpVersion {
    /// Map the numeric form used in router configuration (`4` or `6`).
    pub fn from_number(version: u64) -> Option<Self> {
        match version {
            4 => Some(Self::V4),
            6 => Some(Self::V6),
            _ => None,
        }
    }

    pub fn as_number(self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }

    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPv{}", self.as_number())
    }
}

/// Where a router accepts client connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address literal (without IPv6 brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Resource path, e.g. `/ws`.
    pub resource: String,
    /// Address family to connect over.
    pub ip_version: IpVersion,
    /// Optional certificate for a TLS transport.
    pub certificate: Option<PathBuf>,
}

impl Endpoint {
    /// Plain IPv4 endpoint at `host:port` with resource `/`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            resource: "/".to_string(),
            ip_version: IpVersion::V4,
            certificate: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_ip_version(mut self, ip_version: IpVersion) -> Self {
        self.ip_version = ip_version;
        self
    }

    pub fn with_certificate(mut self, certificate: impl Into<PathBuf>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    /// Whether a certificate was supplied for this endpoint.
    pub fn can_use_tls(&self) -> bool {
        self.certificate.is_some()
    }

    /// Resolve to socket addresses of the configured IP version.
    pub fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                host: self.host.clone(),
                port: self.port,
                source,
            })?
            .filter(|addr| self.ip_version.matches(addr))
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::NoAddress {
                host: self.host.clone(),
                port: self.port,
                version: self.ip_version.as_number(),
            });
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip_version {
            IpVersion::V4 => write!(f, "{}:{}{}", self.host, self.port, self.resource),
            IpVersion::V6 => write!(f, "[{}]:{}{}", self.host, self.port, self.resource),
        }
    }
}
