use std::time::Duration;

use serde_json::Value;
use wampkit_frame::FrameError;

use crate::codec::MessageCode;
use crate::message::Dict;

/// Broad classification of a [`PeerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport unreachable or dropped. Fatal to the session.
    Connection,
    /// Malformed or unexpected message, or a remote application error.
    Protocol,
    /// A bounded wait expired. The session stays usable.
    Timeout,
    /// Bad router, transport or client configuration.
    Configuration,
}

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] wampkit_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Router configuration or lifecycle error.
    #[error("router error: {0}")]
    Router(#[from] wampkit_router::RouterError),

    /// The connection dropped or the session was torn down.
    #[error("connection lost: {0}")]
    Connection(String),

    /// The session is not in a state that allows the operation.
    #[error("session not established (state: {0})")]
    NotEstablished(&'static str),

    /// A frame could not be decoded into a message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The leading code of a frame is not a known message type.
    #[error("unknown message code {0}")]
    UnknownMessageCode(u64),

    /// A decoded message is not in the handler's allow-list.
    #[error("message {0} is not handled by this peer")]
    Unhandled(MessageCode),

    /// The router answered a request with ERROR.
    #[error("remote error {uri}")]
    Remote {
        uri: String,
        args: Vec<Value>,
        kwargs: Dict,
    },

    /// The router refused or aborted the session.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Invalid client-side configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PeerError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            // An oversized outbound frame is refused before it reaches the
            // wire; the session stays usable.
            Self::Frame(FrameError::PayloadTooLarge { .. }) => ErrorKind::Protocol,
            Self::Transport(_) | Self::Frame(_) | Self::Connection(_) => ErrorKind::Connection,
            Self::Router(_) | Self::Configuration(_) => ErrorKind::Configuration,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NotEstablished(_)
            | Self::Protocol(_)
            | Self::UnknownMessageCode(_)
            | Self::Unhandled(_)
            | Self::Remote { .. }
            | Self::HandshakeFailed(_)
            | Self::Json(_) => ErrorKind::Protocol,
        }
    }

    /// The error URI carried by a remote error, if any.
    pub fn remote_uri(&self) -> Option<&str> {
        match self {
            Self::Remote { uri, .. } => Some(uri),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
