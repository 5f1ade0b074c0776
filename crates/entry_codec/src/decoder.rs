//! FrameDecoder - lazy frame decoding with resynchronization

use bytes::BytesMut;
use contracts::LogFrame;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::error::{CodecError, Result};
use crate::proto::LogEntry;
use crate::HEADER_LEN;

/// Decodes length-prefixed frames from a byte stream
///
/// `next_frame` yields `Ok(Some(frame))` per frame and `Ok(None)` on a clean
/// end of stream. A recoverable error (see [`CodecError::is_recoverable`]) leaves
/// the decoder positioned at the next frame boundary, so the caller simply keeps
/// calling `next_frame`.
pub struct FrameDecoder<R> {
    reader: R,
    /// Scratch payload buffer, reused across frames
    scratch: BytesMut,
    max_frame_size: usize,
    frames_decoded: u64,
    resyncs: u64,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    /// Create a decoder accepting payloads up to `max_frame_size` bytes
    pub fn new(reader: R, max_frame_size: usize) -> Self {
        Self {
            reader,
            scratch: BytesMut::new(),
            max_frame_size,
            frames_decoded: 0,
            resyncs: 0,
        }
    }

    /// Decode the next frame
    ///
    /// # Errors
    /// - `Malformed` / `FrameTooLarge`: frame skipped, decoding may continue
    /// - `Truncated` / `Io`: the stream is unusable
    pub async fn next_frame(&mut self) -> Result<Option<LogFrame>> {
        let Some(len) = self.read_header().await? else {
            debug!(frames = self.frames_decoded, "end of stream");
            return Ok(None);
        };

        if len > self.max_frame_size {
            self.skip_payload(len).await?;
            self.resync();
            warn!(len, max = self.max_frame_size, "oversized frame skipped");
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        self.read_payload(len).await?;

        match LogEntry::decode(&self.scratch[..len]) {
            Ok(entry) => {
                self.frames_decoded += 1;
                Ok(Some(entry.into()))
            }
            Err(source) => {
                self.resync();
                warn!(len, error = %source, "malformed frame skipped");
                Err(CodecError::Malformed { len, source })
            }
        }
    }

    /// Frames decoded successfully so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Number of resynchronizations performed
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Release the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Rebuild decoder state after a bad frame
    fn resync(&mut self) {
        self.scratch = BytesMut::new();
        self.resyncs += 1;
    }

    async fn read_header(&mut self) -> Result<Option<usize>> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;

        while filled < HEADER_LEN {
            let n = self.reader.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(CodecError::Truncated {
                    read: filled,
                    expected: HEADER_LEN,
                });
            }
            filled += n;
        }

        Ok(Some(u32::from_be_bytes(header) as usize))
    }

    async fn read_payload(&mut self, len: usize) -> Result<()> {
        self.scratch.clear();
        self.scratch.resize(len, 0);

        let mut filled = 0;
        while filled < len {
            let n = self.reader.read(&mut self.scratch[filled..len]).await?;
            if n == 0 {
                return Err(CodecError::Truncated {
                    read: filled,
                    expected: len,
                });
            }
            filled += n;
        }
        Ok(())
    }

    async fn skip_payload(&mut self, len: usize) -> Result<()> {
        let mut limited = (&mut self.reader).take(len as u64);
        let skipped = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if skipped < len as u64 {
            return Err(CodecError::Truncated {
                read: skipped as usize,
                expected: len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_frame;

    fn framed(frames: &[LogFrame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| encode_frame(f).unwrap().to_vec())
            .collect()
    }

    fn raw_frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_decode_in_order_then_eof() {
        let input = framed(&[
            LogFrame::new("stdout", "a", 1),
            LogFrame::new("stderr", "b", 2),
        ]);
        let mut decoder = FrameDecoder::new(&input[..], 1024);

        let first = decoder.next_frame().await.unwrap().unwrap();
        assert_eq!(first.line, b"a");
        let second = decoder.next_frame().await.unwrap().unwrap();
        assert_eq!(second.source, "stderr");
        assert_eq!(second.timestamp, 2);
        assert!(decoder.next_frame().await.unwrap().is_none());
        assert_eq!(decoder.frames_decoded(), 2);
    }

    #[tokio::test]
    async fn test_malformed_frame_between_good_frames() {
        let mut input = framed(&[LogFrame::new("stdout", "before", 1)]);
        // field 1, length 5, but only one byte follows
        input.extend(raw_frame(&[0x0a, 0x05, b'x']));
        input.extend(framed(&[LogFrame::new("stdout", "after", 2)]));

        let mut decoder = FrameDecoder::new(&input[..], 1024);
        assert_eq!(decoder.next_frame().await.unwrap().unwrap().line, b"before");

        let err = decoder.next_frame().await.unwrap_err();
        assert!(err.is_recoverable(), "got: {err}");

        assert_eq!(decoder.next_frame().await.unwrap().unwrap().line, b"after");
        assert!(decoder.next_frame().await.unwrap().is_none());
        assert_eq!(decoder.resyncs(), 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_skipped() {
        let mut input = raw_frame(&[0u8; 200]);
        input.extend(framed(&[LogFrame::new("stdout", "ok", 3)]));

        let mut decoder = FrameDecoder::new(&input[..], 64);
        let err = decoder.next_frame().await.unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { len: 200, max: 64 }));
        assert_eq!(decoder.next_frame().await.unwrap().unwrap().line, b"ok");
    }

    #[tokio::test]
    async fn test_truncated_payload_is_fatal() {
        let mut input = framed(&[LogFrame::new("stdout", "complete", 1)]);
        input.truncate(input.len() - 2);

        let mut decoder = FrameDecoder::new(&input[..], 1024);
        let err = decoder.next_frame().await.unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_truncated_header_is_fatal() {
        let input = [0u8, 0u8];
        let mut decoder = FrameDecoder::new(&input[..], 1024);
        let err = decoder.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::Truncated {
                read: 2,
                expected: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_payload_decodes_to_default_entry() {
        let input = raw_frame(&[]);
        let mut decoder = FrameDecoder::new(&input[..], 1024);
        let frame = decoder.next_frame().await.unwrap().unwrap();
        assert!(frame.line.is_empty());
        assert!(!frame.partial);
    }
}
