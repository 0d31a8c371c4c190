//! Length-delimited text framing for wampkit.
//!
//! Every WAMP message travels as one text frame:
//! - A 2-byte magic number ("WK") for stream synchronization
//! - A 4-byte little-endian payload length
//! - The UTF-8 payload (a serialized protocol array)
//!
//! The [`FrameSink`] / [`FrameSource`] traits are the boundary the session
//! engine talks to; it never touches sockets directly.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::{pipe, split_stream, FrameSink, FrameSource, PipeEnd, PipeSink, PipeSource};
pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
