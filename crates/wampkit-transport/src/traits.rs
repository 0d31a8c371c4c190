use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::error::Result;

/// A connected router stream. Implements `Read` and `Write`.
///
/// This is the I/O type returned by transport operations. Today it always
/// wraps a TCP stream; a TLS variant would be added alongside.
pub struct WampStream {
    inner: WampStreamInner,
}

enum WampStreamInner {
    Tcp(TcpStream),
}

impl Read for WampStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            WampStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for WampStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            WampStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            WampStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl WampStream {
    /// Create a WampStream from a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: WampStreamInner::Tcp(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            WampStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            WampStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// Used to hand the read half to a listener thread while the write half
    /// stays with the session.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            WampStreamInner::Tcp(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_tcp(cloned))
            }
        }
    }

    /// Shut down both directions. Unblocks a reader parked in `read`.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            WampStreamInner::Tcp(stream) => match stream.shutdown(Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            WampStreamInner::Tcp(stream) => stream.peer_addr().map_err(Into::into),
        }
    }
}

impl std::fmt::Debug for WampStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            WampStreamInner::Tcp(stream) => f
                .debug_struct("WampStream")
                .field("type", &"tcp")
                .field("peer", &stream.peer_addr().ok())
                .finish(),
        }
    }
}
