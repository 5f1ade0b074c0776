//! DurableSink / DurableStore - per-container JSON-lines append log and its read-back side
//!
//! Layout: `<root>/<container id>/container.log`, one `LogMessage` per line.
//!
//! The writer announces every append on a `watch` channel. Following readers wait on
//! that channel once they reach the end of the file, and stop when the writer is gone.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use contracts::{ContractError, LogMessage, LogSink, ReadConfig};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument, warn};

use crate::error::DispatcherError;

/// File holding the records of one container
pub const LOG_FILE_NAME: &str = "container.log";

const READ_CHANNEL_CAPACITY: usize = 64;

/// Directory of one container under the store root
pub fn container_dir(root: &Path, container_id: &str) -> Result<PathBuf, DispatcherError> {
    if container_id.is_empty()
        || container_id == "."
        || container_id == ".."
        || container_id.contains(['/', '\\'])
    {
        return Err(DispatcherError::sink_creation(
            "durable",
            format!("invalid container id '{container_id}'"),
        ));
    }
    Ok(root.join(container_id))
}

/// Append side of the store, owned by the consumption task of one session
pub struct DurableSink {
    name: String,
    path: PathBuf,
    file: Option<File>,
    records: u64,
    notify: Option<watch::Sender<u64>>,
    store: DurableStore,
}

impl DurableSink {
    /// Create the container directory and open its log for appending
    ///
    /// # Errors
    /// `StoreUnavailable` when the directory or file cannot be created.
    #[instrument(name = "durable_sink_create", skip(root), fields(container = %container_id))]
    pub async fn create(root: &Path, container_id: &str) -> Result<Self, DispatcherError> {
        let dir = container_dir(root, container_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DispatcherError::store_unavailable(&dir, e))?;

        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DispatcherError::store_unavailable(&path, e))?;

        let (notify, updates) = watch::channel(0);
        debug!(path = %path.display(), "Durable store opened");

        Ok(Self {
            name: "durable".to_string(),
            store: DurableStore {
                path: path.clone(),
                updates: Some(updates),
            },
            path,
            file: Some(file),
            records: 0,
            notify: Some(notify),
        })
    }

    /// Read-back handle sharing this sink's file
    pub fn store(&self) -> DurableStore {
        self.store.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended by this sink
    pub fn records(&self) -> u64 {
        self.records
    }

    async fn append(&mut self, message: &LogMessage) -> Result<(), ContractError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ContractError::sink_write(&self.name, "store closed"))?;

        let mut record = serde_json::to_vec(message)
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        record.push(b'\n');

        file.write_all(&record).await?;
        file.flush().await?;

        self.records += 1;
        if let Some(notify) = &self.notify {
            notify.send_replace(self.records);
        }
        Ok(())
    }
}

impl LogSink for DurableSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&mut self, message: &LogMessage) -> Result<(), ContractError> {
        self.append(message).await?;
        observability::record_durable_record();
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }

    #[instrument(name = "durable_sink_close", skip(self), fields(path = %self.path.display()))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        // releases following readers
        self.notify = None;
        debug!(records = self.records, "Durable store closed");
        Ok(())
    }
}

/// Read-back side of a container's durable log
#[derive(Debug, Clone)]
pub struct DurableStore {
    path: PathBuf,
    /// `None` when no session is writing (follow is not possible)
    updates: Option<watch::Receiver<u64>>,
}

impl DurableStore {
    /// Open the log of a container whose session is gone
    pub async fn open_existing(root: &Path, container_id: &str) -> Result<Self, DispatcherError> {
        let path = container_dir(root, container_id)?.join(LOG_FILE_NAME);
        tokio::fs::metadata(&path)
            .await
            .map_err(|e| DispatcherError::store_unavailable(&path, e))?;
        Ok(Self {
            path,
            updates: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a live writer is attached
    pub fn is_live(&self) -> bool {
        self.updates.is_some()
    }

    /// Lazily read stored records
    ///
    /// `follow` is ignored when no writer is attached.
    pub fn read(&self, config: ReadConfig) -> RecordStream {
        let (tx, rx) = mpsc::channel(READ_CHANNEL_CAPACITY);
        let mut reader = RecordReader {
            path: self.path.clone(),
            updates: if config.follow {
                self.updates.clone()
            } else {
                None
            },
            config,
            tx,
        };

        tokio::spawn(async move {
            if let Err(e) = reader.run().await {
                warn!(path = %reader.path.display(), error = %e, "Durable read failed");
                let _ = reader.tx.send(Err(e)).await;
            }
        });

        RecordStream { rx }
    }
}

/// Lazy sequence of stored records produced by a background reader
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<Result<LogMessage, DispatcherError>>,
}

impl RecordStream {
    /// Next record, `None` once the reader has finished
    pub async fn next(&mut self) -> Option<Result<LogMessage, DispatcherError>> {
        self.rx.recv().await
    }
}

enum Flow {
    Continue,
    Stop,
}

struct RecordReader {
    path: PathBuf,
    config: ReadConfig,
    updates: Option<watch::Receiver<u64>>,
    tx: mpsc::Sender<Result<LogMessage, DispatcherError>>,
}

impl RecordReader {
    async fn run(&mut self) -> Result<(), DispatcherError> {
        // appends from now on must wake us
        if let Some(updates) = self.updates.as_mut() {
            updates.borrow_and_update();
        }

        let file = File::open(&self.path).await?;
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        // existing records
        let tail = self.config.tail;
        let mut backlog = VecDeque::new();
        let mut past_until = false;
        while let Some(message) = next_record(&mut reader, &mut line).await? {
            if self.config.is_past_until(message.timestamp) {
                past_until = true;
                break;
            }
            if !self.config.admits(message.timestamp) {
                continue;
            }
            match tail {
                Some(0) => {}
                Some(limit) => {
                    if backlog.len() == limit {
                        backlog.pop_front();
                    }
                    backlog.push_back(message);
                }
                None => {
                    if let Flow::Stop = self.emit(message).await {
                        return Ok(());
                    }
                }
            }
        }
        for message in backlog {
            if let Flow::Stop = self.emit(message).await {
                return Ok(());
            }
        }
        if past_until {
            return Ok(());
        }

        // new records while the writer is alive
        let Some(mut updates) = self.updates.take() else {
            return Ok(());
        };
        loop {
            let writer_alive = updates.changed().await.is_ok();
            while let Some(message) = next_record(&mut reader, &mut line).await? {
                if self.config.is_past_until(message.timestamp) {
                    return Ok(());
                }
                if !self.config.admits(message.timestamp) {
                    continue;
                }
                if let Flow::Stop = self.emit(message).await {
                    return Ok(());
                }
            }
            if !writer_alive {
                debug!(path = %self.path.display(), "Writer closed, follow finished");
                return Ok(());
            }
        }
    }

    async fn emit(&self, message: LogMessage) -> Flow {
        if self.tx.send(Ok(message)).await.is_err() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

/// Next complete record, or `None` at the current end of the file
///
/// A trailing line without its newline stays in `line` until the rest arrives.
async fn next_record(
    reader: &mut BufReader<File>,
    line: &mut Vec<u8>,
) -> Result<Option<LogMessage>, DispatcherError> {
    loop {
        let read = reader.read_until(b'\n', line).await?;
        if read == 0 || !line.ends_with(b"\n") {
            return Ok(None);
        }

        let parsed = serde_json::from_slice::<LogMessage>(line.trim_ascii_end());
        line.clear();
        match parsed {
            Ok(message) => return Ok(Some(message)),
            Err(e) => warn!(error = %e, "Skipping corrupt durable record"),
        }
    }
}
