//! Stream transport for wampkit.
//!
//! Provides the connected byte stream a WAMP session runs over:
//! - TCP to a router endpoint (IPv4 or IPv6)
//! - readiness probing (can a TCP connection be established right now)
//!
//! This is the lowest layer of wampkit. Framing lives in `wampkit-frame`,
//! the session engine in `wampkit-peer`.

pub mod endpoint;
pub mod error;
pub mod tcp;
pub mod traits;

pub use endpoint::{Endpoint, IpVersion};
pub use error::{Result, TransportError};
pub use tcp::TcpTransport;
pub use traits::WampStream;
