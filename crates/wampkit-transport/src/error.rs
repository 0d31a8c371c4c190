use std::path::PathBuf;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to resolve the endpoint host.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// The endpoint host resolved, but not to an address of the requested IP version.
    #[error("no IPv{version} address for {host}:{port}")]
    NoAddress {
        host: String,
        port: u16,
        version: u8,
    },

    /// Failed to connect to the endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// TLS was requested but this transport only speaks plain TCP.
    #[error("TLS is not supported by this transport (certificate {path})")]
    TlsUnsupported { path: PathBuf },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
