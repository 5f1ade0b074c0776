//! Tail replay - stored records back onto the wire

use contracts::{LogFrame, ReadConfig};
use dispatcher::RecordStream;
use entry_codec::FrameWriter;
use tokio::io::AsyncWrite;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::registry::SessionRegistry;

/// Re-streams a container's durable records to a consumer
#[derive(Clone)]
pub struct TailReplay {
    registry: SessionRegistry,
}

impl TailReplay {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Replay `identity`'s records into `writer`
    ///
    /// Runs alongside the session still appending to the same store; with
    /// `follow` set, new records keep streaming until that session closes.
    ///
    /// # Returns
    /// Number of records written (sentinel excluded)
    #[instrument(name = "tail_replay", skip(self, writer), fields(container = %identity))]
    pub async fn replay<W>(&self, identity: &str, config: ReadConfig, writer: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let records = self.records(identity, config).await?;
        write_replay(records, writer).await
    }

    /// Open the record stream a replay would write
    ///
    /// Lets callers report a missing container before committing to an
    /// output, then hand the stream to [`write_replay`].
    pub async fn records(&self, identity: &str, config: ReadConfig) -> Result<RecordStream> {
        self.registry.read(identity, config).await
    }
}

/// Encode every record of `records` as a frame, then the end-of-replay sentinel
///
/// A failing read aborts the replay without writing the sentinel.
pub async fn write_replay<W>(mut records: RecordStream, writer: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut frames = FrameWriter::new(writer);
    while let Some(record) = records.next().await {
        let message = match record {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, written = frames.frames_written(), "Replay aborted");
                return Err(e.into());
            }
        };
        frames.write_frame(&LogFrame::from(message)).await?;
        // follow mode may idle for a long time between records
        frames.flush().await?;
    }

    let written = frames.finish().await?;
    observability::record_replay_records(written);
    if written == 0 {
        debug!("Replay found no records");
    } else {
        info!(records = written, "Replay complete");
    }
    Ok(written)
}
