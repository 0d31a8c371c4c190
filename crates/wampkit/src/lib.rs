//! Blocking WAMP client sessions for Rust.
//!
//! wampkit connects to a WAMP router over a framed TCP transport, opens a
//! session in one realm, and lets a process act as caller, callee,
//! publisher and subscriber at the same time.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoints, connect and readiness probing
//! - [`frame`]: length-delimited text frames and the sink/source boundary
//! - [`router`]: router configuration and process lifecycle (behind `router` feature)
//! - [`peer`]: messages, sessions, dispatch and the `Client` (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use wampkit_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use wampkit_frame::*;
}

/// Re-export router types (requires `router` feature).
#[cfg(feature = "router")]
pub mod router {
    pub use wampkit_router::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use wampkit_peer::*;
}

#[cfg(feature = "peer")]
pub use wampkit_peer::{Client, ClientBuilder, Payload, PeerError};
