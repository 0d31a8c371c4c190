//! Router collaborator for wampkit.
//!
//! Loads a crossbar-style router configuration, validates it against an
//! embedded JSON Schema plus the single-realm/single-transport constraint,
//! and manages the router process: start, stop, and readiness polling.
//!
//! The session engine only needs the realm name and the transport endpoint
//! from here; everything else in the router's configuration is opaque.

pub mod config;
pub mod error;
pub mod router;
pub mod schema;
pub mod url;

pub use config::{ConfigLimits, RouterConfig, TransportConfig};
pub use error::{Result, RouterError};
pub use router::{Router, RouterOptions};
pub use url::RouterUrl;
