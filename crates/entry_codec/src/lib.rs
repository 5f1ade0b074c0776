//! # Entry Codec
//!
//! Length-prefixed log entry framing shared by the inbound transport and tail replay.
//!
//! Wire layout of one frame:
//!
//! ```text
//! +----------------------+--------------------------------------------+
//! | u32 length (BE)      | protobuf LogEntry {source, time_nano,      |
//! |                      |                    line, partial}          |
//! +----------------------+--------------------------------------------+
//! ```
//!
//! Responsibilities:
//! - Decode frames lazily from any `AsyncRead`, resynchronizing on malformed frames
//! - Encode frames (and the end-of-replay sentinel) to any `AsyncWrite`

mod decoder;
mod encoder;
mod error;
mod proto;

pub use decoder::FrameDecoder;
pub use encoder::{encode_frame, FrameWriter};
pub use error::{CodecError, Result};
pub use proto::LogEntry;

/// Size of the big-endian length prefix
pub const HEADER_LEN: usize = 4;
