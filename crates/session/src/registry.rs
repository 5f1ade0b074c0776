//! SessionRegistry - process-wide table of active sessions
//!
//! Two indexes over the same sessions: by stream handle and by container id.
//! Every table operation runs inside one short critical section and never
//! awaits session I/O while holding it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    ContainerIdentity, ContainerInfo, LogSink, PipelineConfig, ReadConfig, SessionConfig,
    StreamHandle,
};
use dispatcher::{DurableSink, DurableStore, RecordStream, TelemetryDispatcher};
use futures::future::join_all;
use tokio::io::AsyncRead;
use tracing::{debug, info, instrument, warn};

use crate::accumulator::BatchAccumulator;
use crate::error::{Result, SessionError};
use crate::session::Session;
use crate::stats::SessionStats;

#[derive(Default)]
struct Tables {
    by_handle: HashMap<StreamHandle, Arc<Session>>,
    by_identity: HashMap<String, Arc<Session>>,
}

struct RegistryInner {
    tables: Mutex<Tables>,
    store_root: PathBuf,
    pipeline: PipelineConfig,
}

/// Shared registry of active sessions (cheap to clone)
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create an empty registry whose sessions store logs under `store_root`
    pub fn new(store_root: impl Into<PathBuf>, pipeline: PipelineConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tables: Mutex::new(Tables::default()),
                store_root: store_root.into(),
                pipeline,
            }),
        }
    }

    pub fn store_root(&self) -> &Path {
        &self.inner.store_root
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.inner.pipeline
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session under its handle and container id
    ///
    /// # Errors
    /// `DuplicateSession` when the handle is already taken. A container id
    /// already mapped to another session is re-pointed at the new one.
    pub fn register(&self, session: Arc<Session>) -> Result<()> {
        let mut tables = self.tables();
        if tables.by_handle.contains_key(session.handle()) {
            return Err(SessionError::DuplicateSession {
                handle: session.handle().clone(),
            });
        }

        let identity = session.identity().id.clone();
        if let Some(previous) = tables
            .by_identity
            .insert(identity.clone(), Arc::clone(&session))
        {
            warn!(
                container = %identity,
                previous = %previous.handle(),
                "Container id already mapped, newest session wins"
            );
        }
        tables
            .by_handle
            .insert(session.handle().clone(), session);
        observability::set_active_sessions(tables.by_handle.len());
        Ok(())
    }

    pub fn lookup(&self, handle: &StreamHandle) -> Option<Arc<Session>> {
        self.tables().by_handle.get(handle).cloned()
    }

    pub fn lookup_by_identity(&self, identity: &str) -> Option<Arc<Session>> {
        self.tables().by_identity.get(identity).cloned()
    }

    /// Remove whatever session owns `handle`
    pub fn unregister(&self, handle: &StreamHandle) -> Option<Arc<Session>> {
        let mut tables = self.tables();
        let session = tables.by_handle.remove(handle)?;
        remove_identity_if_same(&mut tables, &session);
        observability::set_active_sessions(tables.by_handle.len());
        Some(session)
    }

    /// Remove `session` only if the tables still point at this exact session
    fn remove_if_same(&self, session: &Arc<Session>) {
        let mut tables = self.tables();
        let same = tables
            .by_handle
            .get(session.handle())
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if same {
            tables.by_handle.remove(session.handle());
        }
        remove_identity_if_same(&mut tables, session);
        observability::set_active_sessions(tables.by_handle.len());
    }

    pub fn len(&self) -> usize {
        self.tables().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered session
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.tables().by_handle.values().cloned().collect()
    }

    /// Start consuming the transport at the handle's path
    ///
    /// # Errors
    /// - `Io` if the transport path does not exist
    /// - `DuplicateSession` / `StoreUnavailable` / `Dispatcher` from session setup
    #[instrument(name = "registry_start", skip(self, info, config), fields(handle = %handle))]
    pub async fn start(
        &self,
        handle: StreamHandle,
        info: &ContainerInfo,
        config: SessionConfig,
    ) -> Result<Arc<Session>> {
        tokio::fs::metadata(handle.as_path()).await?;

        let (session, durable) = self.prepare(handle, info, config).await?;
        let path = session.handle().as_path().to_path_buf();
        let max_frame_size = self.inner.pipeline.max_frame_size;
        let registry = self.clone();
        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            task_session
                .consume_path(path, durable, max_frame_size)
                .await;
            registry.finish(&task_session);
        });

        Ok(session)
    }

    /// Start consuming an already open transport
    #[instrument(
        name = "registry_start_with_source",
        skip(self, info, config, source),
        fields(handle = %handle)
    )]
    pub async fn start_with_source<R>(
        &self,
        handle: StreamHandle,
        info: &ContainerInfo,
        config: SessionConfig,
        source: R,
    ) -> Result<Arc<Session>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (session, durable) = self.prepare(handle, info, config).await?;
        let max_frame_size = self.inner.pipeline.max_frame_size;
        let registry = self.clone();
        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            task_session.consume(source, durable, max_frame_size).await;
            registry.finish(&task_session);
        });

        Ok(session)
    }

    /// Build and register a session in `Created`
    async fn prepare(
        &self,
        handle: StreamHandle,
        info: &ContainerInfo,
        config: SessionConfig,
    ) -> Result<(Arc<Session>, DurableSink)> {
        if self.lookup(&handle).is_some() {
            return Err(SessionError::DuplicateSession { handle });
        }

        let identity = Arc::new(ContainerIdentity::from_info(info, &config));
        let mut durable = DurableSink::create(&self.inner.store_root, &identity.id)
            .await
            .map_err(SessionError::StoreUnavailable)?;

        let dispatcher = match TelemetryDispatcher::create(
            &config.driver,
            &identity,
            &self.inner.pipeline,
        )
        .await
        {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                close_durable(&mut durable).await;
                return Err(e.into());
            }
        };

        let stats = Arc::new(SessionStats::new());
        let accumulator = BatchAccumulator::new(config.threshold(), dispatcher, Arc::clone(&stats));
        let session = Arc::new(Session::new(
            handle,
            Arc::clone(&identity),
            config,
            accumulator,
            durable.store(),
            stats,
        ));

        if let Err(e) = self.register(Arc::clone(&session)) {
            session.close_sinks().await;
            close_durable(&mut durable).await;
            return Err(e);
        }

        info!(
            container = %identity.short_id(),
            tag = %identity.tag,
            driver = session.config().driver.name(),
            store = %durable.path().display(),
            "Session registered"
        );
        Ok((session, durable))
    }

    fn finish(&self, session: &Arc<Session>) {
        self.remove_if_same(session);
        session.mark_closed();
    }

    /// Request drain-and-close of the session owning `handle`
    ///
    /// Unknown handles and repeated stops are no-ops.
    pub async fn stop(&self, handle: &StreamHandle) {
        match self.lookup(handle) {
            Some(session) => session.stop().await,
            None => debug!(handle = %handle, "Stop for unknown handle ignored"),
        }
    }

    /// Open a read-back stream over a container's stored records
    ///
    /// A live session's store is used when present; otherwise records left by
    /// a closed session are read without following.
    ///
    /// # Errors
    /// `SessionNotFound` when the container never stored anything.
    pub async fn read(&self, identity: &str, config: ReadConfig) -> Result<RecordStream> {
        if let Some(session) = self.lookup_by_identity(identity) {
            return Ok(session.store().read(config));
        }

        let store = DurableStore::open_existing(&self.inner.store_root, identity)
            .await
            .map_err(|e| {
                debug!(container = %identity, error = %e, "No stored logs");
                SessionError::SessionNotFound {
                    identity: identity.to_string(),
                }
            })?;
        Ok(store.read(ReadConfig {
            follow: false,
            ..config
        }))
    }

    /// Stop every session and wait until all of them are closed
    pub async fn shutdown_all(&self) {
        let sessions = self.sessions();
        if sessions.is_empty() {
            return;
        }
        info!(sessions = sessions.len(), "Stopping all sessions");
        join_all(sessions.iter().map(|session| async move {
            session.stop().await;
            session.wait_closed().await;
        }))
        .await;
    }
}

fn remove_identity_if_same(tables: &mut Tables, session: &Arc<Session>) {
    let identity = &session.identity().id;
    let same = tables
        .by_identity
        .get(identity)
        .is_some_and(|current| Arc::ptr_eq(current, session));
    if same {
        tables.by_identity.remove(identity);
    }
}

async fn close_durable(durable: &mut DurableSink) {
    if let Err(e) = durable.close().await {
        warn!(error = %e, "Durable store close failed");
    }
}
