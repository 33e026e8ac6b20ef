//! On-disk chunk storage laid out as `root/{identifier}/{index}`.
//!
//! Payloads are streamed into a hidden temp file inside the session directory,
//! size-checked, then renamed over the chunk's final name, so a chunk is either
//! fully present or absent. Storing an index again overwrites it.

use super::{
    completion::ChunkSizeRule,
    error::{UploadError, UploadResult},
    probe::is_probe_entry,
};
use crate::models::chunk::ChunkRecord;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_IDENTIFIER_LEN: usize = 255;
const RETIRED_PREFIX: &str = ".retired-";

#[derive(Clone, Debug)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject identifiers that could name anything other than a single
    /// directory directly beneath the root.
    ///
    /// Allowed: ASCII letters, digits, `-`, `_` and `.`, not starting with `.`.
    pub fn ensure_identifier_safe(identifier: &str) -> UploadResult<()> {
        let valid = !identifier.is_empty()
            && identifier.len() <= MAX_IDENTIFIER_LEN
            && !identifier.starts_with('.')
            && identifier
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if valid {
            Ok(())
        } else {
            Err(UploadError::InvalidIdentifier(identifier.to_string()))
        }
    }

    /// Directory holding every chunk of a session.
    pub fn session_dir(&self, identifier: &str) -> UploadResult<PathBuf> {
        Self::ensure_identifier_safe(identifier)?;
        Ok(self.root.join(identifier))
    }

    /// Deterministic location of one chunk.
    pub fn chunk_path(&self, identifier: &str, index: u64) -> UploadResult<PathBuf> {
        Ok(self.session_dir(identifier)?.join(index.to_string()))
    }

    /// Stream a chunk payload to disk, enforcing `rule` while bytes arrive.
    ///
    /// Nothing is left behind if the stream fails or the size is rejected.
    pub async fn store<S>(
        &self,
        identifier: &str,
        index: u64,
        rule: &ChunkSizeRule,
        stream: S,
    ) -> UploadResult<ChunkRecord>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let dir = self.session_dir(identifier)?;
        let chunk_path = dir.join(index.to_string());
        fs::create_dir_all(&dir).await?;

        let tmp_path = dir.join(format!(".{}.tmp-{}", index, Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let written = match write_checked(&mut file, rule, stream).await {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };
        drop(file);

        if let Err(err) = rule.check(written) {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&tmp_path, &chunk_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&chunk_path).await?;
                fs::rename(&tmp_path, &chunk_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(UploadError::Io(err));
            }
        }

        debug!("stored chunk {}:{} ({} bytes)", identifier, index, written);
        Ok(ChunkRecord {
            index,
            size_bytes: written,
            location: chunk_path,
        })
    }

    pub async fn exists(&self, identifier: &str, index: u64) -> UploadResult<bool> {
        Ok(self.size(identifier, index).await?.is_some())
    }

    /// Stored length of a chunk, `None` if it hasn't been received.
    pub async fn size(&self, identifier: &str, index: u64) -> UploadResult<Option<u64>> {
        let path = self.chunk_path(identifier, index)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(UploadError::Io(err)),
        }
    }

    pub async fn list_indices(&self, identifier: &str) -> UploadResult<BTreeSet<u64>> {
        Ok(self
            .list_records(identifier)
            .await?
            .into_iter()
            .map(|record| record.index)
            .collect())
    }

    /// Every stored chunk of a session, ordered by index. In-flight temp files
    /// are not chunks and are skipped.
    pub async fn list_records(&self, identifier: &str) -> UploadResult<Vec<ChunkRecord>> {
        let dir = self.session_dir(identifier)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(UploadError::Io(err)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(parse_index) else {
                continue;
            };
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(UploadError::Io(err)),
            };
            if !meta.is_file() {
                continue;
            }
            records.push(ChunkRecord {
                index,
                size_bytes: meta.len(),
                location: entry.path(),
            });
        }
        records.sort_by_key(|record| record.index);
        Ok(records)
    }

    /// Delete a session's whole subtree. Returns false if it was already gone.
    pub async fn remove_session(&self, identifier: &str) -> UploadResult<bool> {
        let dir = self.session_dir(identifier)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(UploadError::Io(err)),
        }
    }

    /// Move a session's directory aside under a hidden name. From then on the
    /// identifier has no chunks; a later upload starts from an empty session.
    pub async fn retire_session(&self, identifier: &str) -> UploadResult<PathBuf> {
        let dir = self.session_dir(identifier)?;
        let retired = self.root.join(format!("{}{}", RETIRED_PREFIX, Uuid::new_v4()));
        fs::rename(&dir, &retired).await?;
        Ok(retired)
    }

    /// Put a retired directory back under its identifier.
    pub async fn restore_session(&self, identifier: &str, retired: &Path) -> UploadResult<()> {
        let dir = self.session_dir(identifier)?;
        fs::rename(retired, &dir).await?;
        Ok(())
    }

    /// Retired directories that were never cleared.
    pub async fn retired_dirs(&self) -> UploadResult<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let is_retired = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(RETIRED_PREFIX));
            if !is_retired {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => dirs.push(entry.path()),
                _ => {}
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Identifiers of every session directory currently under the root.
    pub async fn session_ids(&self) -> UploadResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if is_probe_entry(&name) || Self::ensure_identifier_safe(&name).is_err() {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => ids.push(name),
                _ => {}
            }
        }
        ids.sort();
        Ok(ids)
    }
}

async fn write_checked<S>(file: &mut File, rule: &ChunkSizeRule, stream: S) -> UploadResult<u64>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut written: u64 = 0;
    pin_mut!(stream);
    while let Some(piece) = stream.next().await {
        let piece = piece?;
        written += piece.len() as u64;
        rule.check_partial(written)?;
        file.write_all(&piece).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Chunk files are named by their canonical decimal index.
fn parse_index(name: &str) -> Option<u64> {
    let index = name.parse::<u64>().ok()?;
    (index >= 1 && index.to_string() == name).then_some(index)
}
