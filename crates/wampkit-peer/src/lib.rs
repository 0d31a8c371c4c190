//! WAMP client session engine.
//!
//! A [`Client`] owns one session with a router. It opens the session with
//! HELLO/WELCOME, registers the procedures and subscribes the topics it was
//! built with, and then serves INVOCATION and EVENT messages on a dedicated
//! dispatch thread while callers issue CALL and PUBLISH from any thread.
//!
//! Requests and responses are correlated by request id. Each outstanding
//! request parks its caller on a one-shot slot that the dispatch thread
//! fills when the matching response arrives.

pub mod client;
pub mod codec;
pub mod connector;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod message;
pub mod registry;
pub mod roles;
pub mod session;
pub mod uri;

pub use client::{Client, ClientBuilder, PeerConfig};
pub use codec::{correlation_hint, decode, decode_value, MessageCode, ResponseHint, MAX_ID};
pub use connector::{connect, connect_to_router, connect_with_timeout, FrameChannel};
pub use dispatch::DispatchHandle;
pub use error::{ErrorKind, PeerError, Result};
pub use handler::{MessageHandler, Procedure, ProcedureError, Subscription, DEFAULT_ALLOWED};
pub use handshake::{validate_realm, HandshakeConfig};
pub use message::{Dict, List, Message, Payload};
pub use registry::{PeerId, Registry, RegistryEntry};
pub use session::{Correlation, Session, SessionState};
pub use uri::{
    is_normal_close, is_valid_uri, InvocationPolicy, Roles, CLOSE_GOODBYE_AND_OUT, CLOSE_NORMAL,
    CLOSE_SYSTEM_SHUTDOWN, ERROR_INVALID_ARGUMENT, ERROR_NO_SUCH_REGISTRATION, ERROR_RUNTIME,
};
