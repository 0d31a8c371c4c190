use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::WampStream;

/// TCP transport to a router endpoint.
///
/// Connects over the IP version configured on the [`Endpoint`], trying each
/// resolved address in turn.
pub struct TcpTransport;

impl TcpTransport {
    /// Default timeout for a single connection attempt.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to a router endpoint (blocking).
    pub fn connect(endpoint: &Endpoint) -> Result<WampStream> {
        Self::connect_timeout(endpoint, Self::DEFAULT_CONNECT_TIMEOUT)
    }

    /// Connect with an explicit per-address timeout.
    pub fn connect_timeout(endpoint: &Endpoint, timeout: Duration) -> Result<WampStream> {
        if let Some(path) = &endpoint.certificate {
            return Err(TransportError::TlsUnsupported { path: path.clone() });
        }

        let stream = open(endpoint, timeout)?;
        stream.set_nodelay(true)?;
        debug!(%endpoint, "connected to router");
        Ok(WampStream::from_tcp(stream))
    }

    /// Check whether a TCP connection to the endpoint can be established now.
    ///
    /// The probe connection is closed immediately.
    pub fn probe(endpoint: &Endpoint, timeout: Duration) -> Result<()> {
        let stream = open(endpoint, timeout)?;
        let _ = stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    /// Transport name for diagnostics.
    pub fn transport_name() -> &'static str {
        "tcp"
    }
}

fn open(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let addrs = endpoint.resolve()?;
    let mut last_err = None;

    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "connect attempt failed");
                last_err = Some((addr, err));
            }
        }
    }

    match last_err {
        Some((addr, source)) => Err(TransportError::Connect {
            addr: addr.to_string(),
            source,
        }),
        None => {
            warn!(%endpoint, "endpoint resolved to no addresses");
            Err(TransportError::NoAddress {
                host: endpoint.host.clone(),
                port: endpoint.port,
                version: endpoint.ip_version.as_number(),
            })
        }
    }
}
