use std::time::Duration;

use wampkit_frame::{split_stream, FrameConfig, FrameSink, FrameSource};
use wampkit_router::Router;
use wampkit_transport::{Endpoint, TcpTransport, TransportError};

use crate::error::{PeerError, Result};

/// A connected frame channel, split into its two halves.
pub type FrameChannel = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Open a framed TCP channel to `endpoint`.
pub fn connect(endpoint: &Endpoint, frame_config: &FrameConfig) -> Result<FrameChannel> {
    connect_with_timeout(endpoint, frame_config, TcpTransport::DEFAULT_CONNECT_TIMEOUT)
}

/// Open a framed TCP channel with an explicit connect timeout.
pub fn connect_with_timeout(
    endpoint: &Endpoint,
    frame_config: &FrameConfig,
    timeout: Duration,
) -> Result<FrameChannel> {
    let stream = TcpTransport::connect_timeout(endpoint, timeout).map_err(|err| match err {
        TransportError::TlsUnsupported { .. } => PeerError::Configuration(err.to_string()),
        other => PeerError::Transport(other),
    })?;
    let (writer, reader) = split_stream(stream, frame_config.clone())?;
    Ok((Box::new(writer), Box::new(reader)))
}

/// Open a framed TCP channel to the router's configured transport.
pub fn connect_to_router(router: &Router, frame_config: &FrameConfig) -> Result<FrameChannel> {
    connect(&router.endpoint(), frame_config)
}
