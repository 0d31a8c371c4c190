//! Frame channel boundary.
//!
//! The session engine only ever sees text frames through these two halves.
//! The read half is owned by exactly one listener; the write half is shared
//! behind the session's send lock.

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;
use wampkit_transport::WampStream;

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// Outbound half of a frame channel.
pub trait FrameSink: Send {
    /// Transmit one text frame.
    fn send_text(&mut self, text: &str) -> Result<()>;

    /// Close the outbound direction. Further sends fail.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Inbound half of a frame channel.
pub trait FrameSource: Send {
    /// Block for the next text frame. `Ok(None)` means the peer closed.
    fn recv_text(&mut self) -> Result<Option<String>>;
}

impl FrameSink for FrameWriter<WampStream> {
    fn send_text(&mut self, text: &str) -> Result<()> {
        FrameWriter::send_text(self, text)
    }

    fn close(&mut self) -> Result<()> {
        self.get_ref()
            .shutdown()
            .map_err(crate::reader::transport_to_frame_error)
    }
}

impl<T: std::io::Read + Send> FrameSource for FrameReader<T> {
    fn recv_text(&mut self) -> Result<Option<String>> {
        match self.read_text() {
            Ok(text) => Ok(Some(text)),
            Err(FrameError::ConnectionClosed) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Split a connected stream into a framed sink/source pair.
pub fn split_stream(
    stream: WampStream,
    config: FrameConfig,
) -> Result<(FrameWriter<WampStream>, FrameReader<WampStream>)> {
    let reader_stream = stream
        .try_clone()
        .map_err(crate::reader::transport_to_frame_error)?;
    let reader = FrameReader::with_config_stream(reader_stream, config.clone())?;
    let writer = FrameWriter::with_config_stream(stream, config)?;
    Ok((writer, reader))
}

/// One end of an in-memory frame pipe.
pub struct PipeEnd {
    pub sink: PipeSink,
    pub source: PipeSource,
}

impl PipeEnd {
    pub fn split(self) -> (PipeSink, PipeSource) {
        (self.sink, self.source)
    }
}

/// Sending half of an in-memory pipe. Dropping or closing it ends the
/// opposite source's stream.
pub struct PipeSink {
    tx: Option<Sender<String>>,
}

/// Receiving half of an in-memory pipe.
pub struct PipeSource {
    rx: Receiver<String>,
}

/// Create a connected pair of in-memory frame pipe ends.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let (left_tx, right_rx) = unbounded();
    let (right_tx, left_rx) = unbounded();
    (
        PipeEnd {
            sink: PipeSink { tx: Some(left_tx) },
            source: PipeSource { rx: left_rx },
        },
        PipeEnd {
            sink: PipeSink { tx: Some(right_tx) },
            source: PipeSource { rx: right_rx },
        },
    )
}

impl FrameSink for PipeSink {
    fn send_text(&mut self, text: &str) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(FrameError::ConnectionClosed)?;
        tx.send(text.to_string())
            .map_err(|_| FrameError::ConnectionClosed)
    }

    fn close(&mut self) -> Result<()> {
        if self.tx.take().is_some() {
            debug!("pipe sink closed");
        }
        Ok(())
    }
}

impl FrameSource for PipeSource {
    fn recv_text(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().ok())
    }
}
