//! Frame encoding

use bytes::{BufMut, Bytes, BytesMut};
use contracts::LogFrame;
use prost::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{CodecError, Result};
use crate::proto::LogEntry;
use crate::HEADER_LEN;

/// Encode one frame: big-endian length prefix followed by the protobuf payload
pub fn encode_frame(frame: &LogFrame) -> Result<Bytes> {
    let entry = LogEntry::from(frame);
    let len = entry.encoded_len();
    let prefix = u32::try_from(len).map_err(|_| CodecError::FrameTooLarge {
        len,
        max: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + len);
    buf.put_u32(prefix);
    entry
        .encode(&mut buf)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(buf.freeze())
}

/// Writes frames to an `AsyncWrite`, terminating with the end-of-replay sentinel
pub struct FrameWriter<W> {
    writer: W,
    frames_written: u64,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames_written: 0,
        }
    }

    /// Write one frame
    pub async fn write_frame(&mut self, frame: &LogFrame) -> Result<()> {
        let bytes = encode_frame(frame)?;
        self.writer.write_all(&bytes).await?;
        self.frames_written += 1;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Frames written so far (sentinel excluded)
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Write the end-of-replay sentinel, flush and shut the writer down
    ///
    /// Returns the number of frames written before the sentinel.
    pub async fn finish(mut self) -> Result<u64> {
        let bytes = encode_frame(&LogFrame::end_of_replay())?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(self.frames_written)
    }
}
