//! UploadService: the write path and status path of chunked uploads.
//!
//! Every chunk goes through `upload_chunk`: the payload is stored under the
//! session's shared lock, then, under the exclusive lock, completion is checked
//! and a complete session is assembled. The exclusive section is what makes
//! assembly happen at most once even when the last chunks race each other.

use super::{
    assembler::Assembler,
    chunk_store::ChunkStore,
    completion::{ChunkSizeRule, is_complete},
    error::UploadResult,
    probe::DirectoryProbe,
    reaper::SessionReaper,
    session_locks::{SessionLock, SessionLocks},
};
use crate::models::{
    chunk::{AssembledFile, ChunkStatus},
    upload::ChunkRequest,
};
use bytes::Bytes;
use futures::Stream;
use std::{io, path::PathBuf, time::Duration};
use tracing::debug;

/// Shared state behind every handler. Cheap to clone.
#[derive(Clone, Debug)]
pub struct UploadService {
    pub probe: DirectoryProbe,
    pub store: ChunkStore,
    pub locks: SessionLocks,
    pub assembler: Assembler,

    /// The final chunk may be up to this many times the nominal chunk size.
    pub final_chunk_factor: u64,
}

impl UploadService {
    pub fn new(
        chunk_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        final_chunk_factor: u64,
    ) -> Self {
        let chunk_root = chunk_root.into();
        let store = ChunkStore::new(chunk_root.clone());
        Self {
            probe: DirectoryProbe::new(chunk_root),
            assembler: Assembler::new(store.clone(), output_dir),
            store,
            locks: SessionLocks::new(),
            final_chunk_factor,
        }
    }

    /// A reaper sharing this service's storage and session locks.
    pub fn reaper(&self, timeout: Duration, interval: Duration) -> SessionReaper {
        SessionReaper::new(self.store.clone(), self.locks.clone(), timeout, interval)
    }

    /// Store one chunk. Returns the assembled file when this chunk completed
    /// the session, `None` while it is still incomplete.
    pub async fn upload_chunk<S>(
        &self,
        request: &ChunkRequest,
        stream: S,
    ) -> UploadResult<Option<AssembledFile>>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        self.probe.check().await?;
        let session = &request.session;
        ChunkStore::ensure_identifier_safe(&session.identifier)?;
        self.assembler.target_path(session)?;

        let handle = self.locks.handle(&session.identifier);
        let result = self.upload_locked(&handle, request, stream).await;
        self.locks.release(&session.identifier, handle);
        result
    }

    async fn upload_locked<S>(
        &self,
        handle: &SessionLock,
        request: &ChunkRequest,
        stream: S,
    ) -> UploadResult<Option<AssembledFile>>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let session = &request.session;
        let rule = ChunkSizeRule::for_chunk(session, request.chunk_number, self.final_chunk_factor);

        {
            let _shared = handle.read().await;
            self.store
                .store(&session.identifier, request.chunk_number, &rule, stream)
                .await?;
        }

        let _exclusive = handle.write().await;
        let stored = self.store.list_records(&session.identifier).await?;
        if !is_complete(session, &stored)? {
            debug!(
                "session {} has {} of {} chunks",
                session.identifier,
                stored.len(),
                session.total_chunks
            );
            return Ok(None);
        }

        self.assembler.assemble(session).await.map(Some)
    }

    /// Point query about one chunk. Never mutates storage.
    pub async fn chunk_status(&self, request: &ChunkRequest) -> UploadResult<(String, ChunkStatus)> {
        if let Err(err) = self.probe.check().await {
            return Ok((format!("Directory is broken: {err}"), ChunkStatus::Unavailable));
        }

        let session = &request.session;
        let part = format!("{}:{}", session.identifier, request.chunk_number);
        let Some(size) = self
            .store
            .size(&session.identifier, request.chunk_number)
            .await?
        else {
            return Ok((
                format!("The part {part} isn't started yet!"),
                ChunkStatus::NotStarted,
            ));
        };

        let rule = ChunkSizeRule::for_chunk(session, request.chunk_number, self.final_chunk_factor);
        if !rule.is_final && !rule.accepts(size) {
            return Ok((format!("The part {part} is the wrong size!"), ChunkStatus::Corrupt));
        }

        Ok((format!("The part {part} looks great!"), ChunkStatus::Ok))
    }
}
